//! Stream aggregation rule files.
//!
//! A rule file is a YAML list of rules:
//!
//! ```yaml
//! - match: 'http_requests_total{job="api"}'
//!   interval: 1m
//!   by: [instance]
//!   outputs: [total, count_samples]
//! - match: ['cpu_usage', 'mem_usage']
//!   interval: 30s
//!   dedup_interval: 10s
//!   without: [pod]
//!   outputs: ['quantiles(0.5, 0.99)', avg]
//! ```
//!
//! Parsing produces a [`RuleSetConfig`], which is what reloads compare to
//! decide whether anything changed.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use streamaggr_core::{AggrError, AggrResult};

/// Outputs accepted in the `outputs` list, besides `quantiles(...)`
pub const SUPPORTED_OUTPUTS: &[&str] = &[
    "total",
    "total_prometheus",
    "increase",
    "increase_prometheus",
    "rate_sum",
    "rate_avg",
    "count_series",
    "count_samples",
    "unique_samples",
    "sum_samples",
    "last",
    "min",
    "max",
    "avg",
    "stddev",
    "stdvar",
    "histogram_bucket",
];

/// Options applied to every rule in a rule set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// Input de-duplication interval; zero disables it
    pub dedup_interval: Duration,
    /// Whether raw input rows are kept after matching
    pub keep_input: bool,
    /// Whether raw input rows are dropped after matching
    pub drop_input: bool,
}

/// One validated aggregation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRule {
    /// Series selectors; empty matches every series
    pub matchers: Vec<String>,
    pub interval: Duration,
    pub outputs: Vec<String>,
    pub by: Vec<String>,
    pub without: Vec<String>,
    pub dedup_interval: Option<Duration>,
    pub staleness_interval: Option<Duration>,
    pub keep_metric_names: bool,
    pub flush_on_shutdown: bool,
}

/// A parsed rule file together with the options it was loaded with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSetConfig {
    pub rules: Vec<AggregationRule>,
    pub options: AggregatorOptions,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Rule as written in the file, before validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(rename = "match", default)]
    matchers: Option<OneOrMany>,
    interval: String,
    outputs: Vec<String>,
    #[serde(default)]
    by: Vec<String>,
    #[serde(default)]
    without: Vec<String>,
    #[serde(default)]
    dedup_interval: Option<String>,
    #[serde(default)]
    staleness_interval: Option<String>,
    #[serde(default)]
    keep_metric_names: bool,
    #[serde(default)]
    flush_on_shutdown: bool,
}

impl RuleSetConfig {
    /// Number of rules in the set
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parse a duration such as `500ms`, `30s`, `1m`, `1h30m`, `1d` or `1w`
pub fn parse_duration(input: &str) -> AggrResult<Duration> {
    parse_duration_str(input).map_err(AggrError::configuration)
}

fn parse_duration_str(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration {:?}: expected a number", input));
        }
        let num: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {:?}: number too large", input))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let too_large = || format!("invalid duration {:?}: too large", input);
        let secs = |factor: u64| {
            num.checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(too_large)
        };
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(num),
            "s" => Duration::from_secs(num),
            "m" => secs(60)?,
            "h" => secs(3600)?,
            "d" => secs(86400)?,
            "w" => secs(604800)?,
            unit => {
                return Err(format!(
                    "invalid duration {:?}: unknown unit {:?}",
                    input, unit
                ))
            }
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

fn is_valid_output(output: &str) -> bool {
    if SUPPORTED_OUTPUTS.contains(&output) {
        return true;
    }
    let Some(args) = output
        .strip_prefix("quantiles(")
        .and_then(|s| s.strip_suffix(')'))
    else {
        return false;
    };
    let phis: Vec<&str> = args.split(',').map(str::trim).collect();
    !phis.is_empty()
        && phis.iter().all(|phi| {
            phi.parse::<f64>()
                .map(|phi| (0.0..=1.0).contains(&phi))
                .unwrap_or(false)
        })
}

impl AggregationRule {
    fn from_raw(raw: RawRule, index: usize) -> AggrResult<Self> {
        let err = |msg: String| AggrError::configuration(format!("rule #{}: {}", index + 1, msg));

        let interval = parse_duration_str(&raw.interval).map_err(err)?;
        if interval < Duration::from_secs(1) {
            return Err(err(format!(
                "interval must be at least 1s; got {:?}",
                raw.interval
            )));
        }

        let dedup_interval = raw
            .dedup_interval
            .as_deref()
            .map(parse_duration_str)
            .transpose()
            .map_err(err)?;
        if let Some(dedup) = dedup_interval {
            if dedup > interval {
                return Err(err(format!(
                    "dedup_interval {:?} cannot exceed interval {:?}",
                    dedup, interval
                )));
            }
            if !dedup.is_zero() && interval.as_millis() % dedup.as_millis() != 0 {
                return Err(err(format!(
                    "interval {:?} must be a multiple of dedup_interval {:?}",
                    interval, dedup
                )));
            }
        }

        let staleness_interval = raw
            .staleness_interval
            .as_deref()
            .map(parse_duration_str)
            .transpose()
            .map_err(err)?;
        if let Some(staleness) = staleness_interval {
            if staleness < interval {
                return Err(err(format!(
                    "staleness_interval {:?} cannot be smaller than interval {:?}",
                    staleness, interval
                )));
            }
        }

        if raw.outputs.is_empty() {
            return Err(err("outputs cannot be empty".to_string()));
        }
        for (i, output) in raw.outputs.iter().enumerate() {
            if !is_valid_output(output) {
                return Err(err(format!("unsupported output {:?}", output)));
            }
            if raw.outputs[..i].contains(output) {
                return Err(err(format!("duplicate output {:?}", output)));
            }
        }

        if !raw.by.is_empty() && !raw.without.is_empty() {
            return Err(err("by and without cannot be used together".to_string()));
        }

        let matchers = raw.matchers.map(OneOrMany::into_vec).unwrap_or_default();
        if matchers.iter().any(|m| m.trim().is_empty()) {
            return Err(err("match cannot contain empty selectors".to_string()));
        }

        Ok(Self {
            matchers,
            interval,
            outputs: raw.outputs,
            by: raw.by,
            without: raw.without,
            dedup_interval,
            staleness_interval,
            keep_metric_names: raw.keep_metric_names,
            flush_on_shutdown: raw.flush_on_shutdown,
        })
    }
}

/// Parse and validate rule file contents
pub fn parse_rules(data: &str, options: AggregatorOptions) -> AggrResult<RuleSetConfig> {
    if data.trim().is_empty() {
        return Ok(RuleSetConfig {
            rules: Vec::new(),
            options,
        });
    }

    let raw: Option<Vec<RawRule>> = serde_yaml::from_str(data)
        .map_err(|e| AggrError::configuration(format!("cannot parse rules: {}", e)))?;

    let rules = raw
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, raw)| AggregationRule::from_raw(raw, i))
        .collect::<AggrResult<Vec<_>>>()?;

    Ok(RuleSetConfig { rules, options })
}

/// Read, parse and validate a rule file
pub fn load_rules_file(path: &Path, options: AggregatorOptions) -> AggrResult<RuleSetConfig> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        AggrError::configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_rules(&data, options).map_err(|e| match e {
        AggrError::Configuration(msg) => {
            AggrError::configuration(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Check a rule file without starting any aggregation.
///
/// Returns the number of rules in the file.
pub fn check_config(path: &Path, options: AggregatorOptions) -> AggrResult<usize> {
    load_rules_file(path, options).map(|config| config.len())
}
