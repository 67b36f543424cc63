use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::retention::InputRetention;
use crate::rules::AggregatorOptions;

/// Configuration for the ingest side of stream aggregation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Rule file and reload behaviour
    pub stream_aggr: StreamAggrConfig,

    /// Conversion of aggregate output back into rows
    pub feedback: FeedbackConfig,
}

/// Stream aggregation rule set configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamAggrConfig {
    /// Path to the rule file. Aggregation is disabled when unset.
    pub config_path: Option<PathBuf>,

    /// Keep every input row after aggregation
    pub keep_input: bool,

    /// Drop every input row after aggregation
    pub drop_input: bool,

    /// Only the last sample per series within this interval is aggregated.
    /// Zero disables de-duplication.
    pub dedup_interval_ms: u64,

    /// Re-read the rule file on this interval. Zero disables periodic checks.
    pub check_interval_ms: u64,

    /// Re-read the rule file when the process receives SIGHUP
    pub reload_on_sighup: bool,
}

/// Feedback writer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Maximum number of labels on an aggregate series, including `__name__`
    pub max_labels_per_series: usize,

    /// Maximum length of a label value in bytes
    pub max_label_value_len: usize,
}

impl Default for StreamAggrConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            keep_input: false,
            drop_input: false,
            dedup_interval_ms: 0,
            check_interval_ms: 0,
            reload_on_sighup: true,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            max_labels_per_series: 30,
            max_label_value_len: 16 * 1024,
        }
    }
}

impl IngestConfig {
    /// Load configuration from file, environment variables, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Try to load from config file first
        if let Ok(config_path) = env::var("CONFIG_PATH") {
            config = Self::load_from_file(&config_path)?;
        } else if std::path::Path::new("config/development.yaml").exists() {
            config = Self::load_from_file("config/development.yaml")?;
        } else if std::path::Path::new("config/production.yaml").exists() {
            config = Self::load_from_file("config/production.yaml")?;
        }

        config.apply_env_overrides()?;

        // Validate the loaded configuration
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Override settings with `STREAMAGGR_*` environment variables if present
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = env::var("STREAMAGGR_CONFIG_PATH") {
            self.stream_aggr.config_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Ok(keep_input) = env::var("STREAMAGGR_KEEP_INPUT") {
            self.stream_aggr.keep_input = keep_input
                .parse()
                .context("Invalid STREAMAGGR_KEEP_INPUT")?;
        }

        if let Ok(drop_input) = env::var("STREAMAGGR_DROP_INPUT") {
            self.stream_aggr.drop_input = drop_input
                .parse()
                .context("Invalid STREAMAGGR_DROP_INPUT")?;
        }

        if let Ok(dedup) = env::var("STREAMAGGR_DEDUP_INTERVAL_MS") {
            self.stream_aggr.dedup_interval_ms =
                dedup.parse().context("Invalid STREAMAGGR_DEDUP_INTERVAL_MS")?;
        }

        if let Ok(check) = env::var("STREAMAGGR_CHECK_INTERVAL_MS") {
            self.stream_aggr.check_interval_ms =
                check.parse().context("Invalid STREAMAGGR_CHECK_INTERVAL_MS")?;
        }

        if let Ok(sighup) = env::var("STREAMAGGR_RELOAD_ON_SIGHUP") {
            self.stream_aggr.reload_on_sighup =
                sighup.parse().context("Invalid STREAMAGGR_RELOAD_ON_SIGHUP")?;
        }

        if let Ok(max_labels) = env::var("STREAMAGGR_MAX_LABELS_PER_SERIES") {
            self.feedback.max_labels_per_series = max_labels
                .parse()
                .context("Invalid STREAMAGGR_MAX_LABELS_PER_SERIES")?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.stream_aggr.keep_input && self.stream_aggr.drop_input {
            return Err(anyhow::anyhow!(
                "keep_input and drop_input cannot both be enabled"
            ));
        }

        if let Some(path) = &self.stream_aggr.config_path {
            if path.as_os_str().is_empty() {
                return Err(anyhow::anyhow!("Stream aggregation config path cannot be empty"));
            }
        }

        if self.feedback.max_labels_per_series == 0 {
            return Err(anyhow::anyhow!(
                "Max labels per series must be greater than 0"
            ));
        }

        if self.feedback.max_label_value_len == 0 {
            return Err(anyhow::anyhow!(
                "Max label value length must be greater than 0"
            ));
        }

        Ok(())
    }
}

impl StreamAggrConfig {
    /// Check if a rule file is configured
    pub fn is_enabled(&self) -> bool {
        self.config_path.is_some()
    }

    /// Get the de-duplication interval as a Duration
    pub fn dedup_interval(&self) -> Duration {
        Duration::from_millis(self.dedup_interval_ms)
    }

    /// Get the periodic check interval, if enabled
    pub fn check_interval(&self) -> Option<Duration> {
        if self.check_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.check_interval_ms))
        }
    }

    /// Options handed to every rule set built from this configuration
    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            dedup_interval: self.dedup_interval(),
            keep_input: self.keep_input,
            drop_input: self.drop_input,
        }
    }

    /// What happens to input rows once the rule set has flagged them
    pub fn retention(&self) -> InputRetention {
        InputRetention::from_flags(self.keep_input, self.drop_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.stream_aggr.is_enabled());
        assert_eq!(config.stream_aggr.check_interval(), None);
        assert_eq!(config.stream_aggr.dedup_interval(), Duration::ZERO);
    }

    #[test]
    fn test_keep_and_drop_input_conflict() {
        let mut config = IngestConfig::default();
        config.stream_aggr.keep_input = true;
        config.stream_aggr.drop_input = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keep_input"));
    }

    #[test]
    fn test_zero_label_limit_rejected() {
        let mut config = IngestConfig::default();
        config.feedback.max_labels_per_series = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stream_aggr:\n  config_path: /etc/aggr/rules.yaml\n  dedup_interval_ms: 30000\n  check_interval_ms: 5000"
        )
        .unwrap();

        let config = IngestConfig::load_from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            config.stream_aggr.config_path,
            Some(PathBuf::from("/etc/aggr/rules.yaml"))
        );
        assert_eq!(config.stream_aggr.dedup_interval(), Duration::from_secs(30));
        assert_eq!(
            config.stream_aggr.check_interval(),
            Some(Duration::from_secs(5))
        );
        assert!(config.stream_aggr.reload_on_sighup);
        assert_eq!(config.feedback.max_labels_per_series, 30);
    }

    #[test]
    fn test_load_missing_file() {
        let err = IngestConfig::load_from_file("/nonexistent/streamaggr.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_aggregator_options_and_retention() {
        let mut config = StreamAggrConfig::default();
        config.dedup_interval_ms = 1500;
        config.keep_input = true;

        let options = config.aggregator_options();
        assert_eq!(options.dedup_interval, Duration::from_millis(1500));
        assert!(options.keep_input);
        assert!(!options.drop_input);
        assert_eq!(config.retention(), InputRetention::KeepAll);
    }
}
