//! Feedback of aggregate output into the storage write path

use prometheus::Registry;
use std::sync::Arc;
use streamaggr_core::{
    time::flush_timestamp_millis, AggrError, AggrResult, MetricName, MetricRow, TimeSeries,
    METRIC_NAME_LABEL,
};
use tracing::{error, trace};

use crate::config::FeedbackConfig;
use crate::engine::AggregateSink;
use crate::metrics::FeedbackMetrics;
use crate::storage::RowStorage;

/// Turns aggregate series back into rows and writes them to storage.
///
/// A batch is written in full or not at all: the first series that cannot
/// be converted aborts the whole call.
pub struct FeedbackWriter {
    storage: Arc<dyn RowStorage>,
    max_labels_per_series: usize,
    max_label_value_len: usize,
    metrics: FeedbackMetrics,
}

impl FeedbackWriter {
    pub fn new(
        storage: Arc<dyn RowStorage>,
        config: &FeedbackConfig,
        registry: &Registry,
    ) -> AggrResult<Self> {
        Ok(Self {
            storage,
            max_labels_per_series: config.max_labels_per_series,
            max_label_value_len: config.max_label_value_len,
            metrics: FeedbackMetrics::new(registry)?,
        })
    }

    pub fn metrics(&self) -> &FeedbackMetrics {
        &self.metrics
    }

    /// Convert one aggregate series into a row stamped with `timestamp`.
    ///
    /// `mn` is scratch space and is overwritten.
    pub fn build_row(
        &self,
        mn: &mut MetricName,
        series: &TimeSeries,
        timestamp: i64,
    ) -> AggrResult<MetricRow> {
        if series.labels.len() > self.max_labels_per_series {
            return Err(AggrError::feedback_build(format!(
                "series has {} labels, limit is {}",
                series.labels.len(),
                self.max_labels_per_series
            )));
        }

        mn.reset();
        for label in &series.labels {
            if label.value.len() > self.max_label_value_len {
                return Err(AggrError::feedback_build(format!(
                    "value of label {:?} is {} bytes, limit is {}",
                    label.name,
                    label.value.len(),
                    self.max_label_value_len
                )));
            }
            if label.name == METRIC_NAME_LABEL {
                mn.set_metric_group(label.value.as_bytes());
            } else if label.name.is_empty() {
                return Err(AggrError::feedback_build("empty label name"));
            } else {
                mn.add_tag(label.name.as_bytes(), label.value.as_bytes());
            }
        }

        if mn.metric_group().is_empty() {
            return Err(AggrError::feedback_build(format!(
                "missing {} label",
                METRIC_NAME_LABEL
            )));
        }
        let sample = series
            .samples
            .first()
            .ok_or_else(|| AggrError::feedback_build(format!("series {} has no samples", mn)))?;

        mn.sort_tags();
        Ok(MetricRow::new(mn, timestamp, sample.value))
    }

    /// Build every row, then write them in one storage call.
    ///
    /// Returns the number of rows written.
    pub fn write(&self, series: &[TimeSeries]) -> AggrResult<usize> {
        if series.is_empty() {
            return Ok(0);
        }

        let timestamp = flush_timestamp_millis();
        let mut mn = MetricName::new();
        let mut rows = Vec::with_capacity(series.len());
        for (i, ts) in series.iter().enumerate() {
            match self.build_row(&mut mn, ts, timestamp) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    self.metrics.build_errors_total.inc();
                    error!(
                        "Cannot convert aggregate series {} of {} to a row, dropping the batch: {}",
                        i + 1,
                        series.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.storage.add_rows(&rows) {
            self.metrics.write_errors_total.inc();
            error!("Cannot write {} aggregate rows: {}", rows.len(), e);
            return Err(e);
        }

        self.metrics.rows_written_total.inc_by(rows.len() as u64);
        trace!("Wrote {} aggregate rows at {}", rows.len(), timestamp);
        Ok(rows.len())
    }
}

impl AggregateSink for FeedbackWriter {
    fn push_aggregates(&self, series: &[TimeSeries]) {
        // Failures are logged and counted by `write`.
        let _ = self.write(series);
    }
}
