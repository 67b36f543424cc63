//! Prometheus metrics for rule-set reloads and aggregate feedback

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use streamaggr_core::{time::unix_timestamp, AggrError, AggrResult};

fn register<C>(registry: &Registry, collector: C) -> AggrResult<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| AggrError::configuration(format!("Failed to register metric: {}", e)))?;
    Ok(collector)
}

fn counter(registry: &Registry, name: &str, help: &str) -> AggrResult<IntCounter> {
    let counter = IntCounter::new(name, help)
        .map_err(|e| AggrError::configuration(format!("Invalid metric {}: {}", name, e)))?;
    register(registry, counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> AggrResult<IntGauge> {
    let gauge = IntGauge::new(name, help)
        .map_err(|e| AggrError::configuration(format!("Invalid metric {}: {}", name, e)))?;
    register(registry, gauge)
}

/// Counters describing rule-set reload attempts
#[derive(Clone)]
pub struct ReloadMetrics {
    /// Every reload attempt, successful or not
    pub reloads_total: IntCounter,
    /// Reload attempts whose rule file failed to load
    pub reload_errors_total: IntCounter,
    /// 1 if the last attempt succeeded, 0 otherwise
    pub last_reload_successful: IntGauge,
    /// Unix time in seconds of the last successful attempt
    pub last_reload_success_timestamp_seconds: IntGauge,
}

impl ReloadMetrics {
    /// Create and register the reload metrics
    pub fn new(registry: &Registry) -> AggrResult<Self> {
        Ok(Self {
            reloads_total: counter(
                registry,
                "streamaggr_config_reloads_total",
                "Total number of stream aggregation rule reload attempts",
            )?,
            reload_errors_total: counter(
                registry,
                "streamaggr_config_reloads_errors_total",
                "Total number of failed stream aggregation rule reloads",
            )?,
            last_reload_successful: gauge(
                registry,
                "streamaggr_config_last_reload_successful",
                "Whether the last stream aggregation rule reload succeeded",
            )?,
            last_reload_success_timestamp_seconds: gauge(
                registry,
                "streamaggr_config_last_reload_success_timestamp_seconds",
                "Timestamp of the last successful stream aggregation rule reload",
            )?,
        })
    }

    pub fn record_attempt(&self) {
        self.reloads_total.inc();
    }

    pub fn record_success(&self) {
        self.last_reload_successful.set(1);
        self.last_reload_success_timestamp_seconds
            .set(unix_timestamp());
    }

    pub fn record_failure(&self) {
        self.reload_errors_total.inc();
        self.last_reload_successful.set(0);
    }

    pub fn snapshot(&self) -> ReloadMetricsSnapshot {
        ReloadMetricsSnapshot {
            reloads_total: self.reloads_total.get(),
            reload_errors_total: self.reload_errors_total.get(),
            last_reload_successful: self.last_reload_successful.get() == 1,
            last_reload_success_timestamp_seconds: self
                .last_reload_success_timestamp_seconds
                .get(),
        }
    }
}

/// Point-in-time copy of [`ReloadMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadMetricsSnapshot {
    pub reloads_total: u64,
    pub reload_errors_total: u64,
    pub last_reload_successful: bool,
    pub last_reload_success_timestamp_seconds: i64,
}

/// Counters for aggregate rows written back to storage
#[derive(Clone)]
pub struct FeedbackMetrics {
    pub rows_written_total: IntCounter,
    pub build_errors_total: IntCounter,
    pub write_errors_total: IntCounter,
}

impl FeedbackMetrics {
    pub fn new(registry: &Registry) -> AggrResult<Self> {
        Ok(Self {
            rows_written_total: counter(
                registry,
                "streamaggr_feedback_rows_written_total",
                "Total number of aggregate rows written to storage",
            )?,
            build_errors_total: counter(
                registry,
                "streamaggr_feedback_build_errors_total",
                "Total number of aggregate batches rejected while building rows",
            )?,
            write_errors_total: counter(
                registry,
                "streamaggr_feedback_write_errors_total",
                "Total number of aggregate batches the storage failed to write",
            )?,
        })
    }
}

/// Render every metric in the registry in the Prometheus text format
pub fn render(registry: &Registry) -> AggrResult<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| AggrError::configuration(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| AggrError::configuration(format!("Metrics output is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_metrics() {
        let registry = Registry::new();
        let metrics = ReloadMetrics::new(&registry).unwrap();

        metrics.record_attempt();
        metrics.record_success();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.reloads_total, 1);
        assert!(snapshot.last_reload_successful);
        assert!(snapshot.last_reload_success_timestamp_seconds > 0);

        metrics.record_attempt();
        metrics.record_failure();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.reloads_total, 2);
        assert_eq!(snapshot.reload_errors_total, 1);
        assert!(!snapshot.last_reload_successful);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ReloadMetrics::new(&registry).unwrap();
        assert!(ReloadMetrics::new(&registry).is_err());
    }

    #[test]
    fn test_render() {
        let registry = Registry::new();
        let metrics = FeedbackMetrics::new(&registry).unwrap();
        metrics.rows_written_total.inc_by(5);

        let text = render(&registry).unwrap();
        assert!(text.contains("streamaggr_feedback_rows_written_total 5"));
        assert!(text.contains("streamaggr_feedback_write_errors_total 0"));
    }
}
