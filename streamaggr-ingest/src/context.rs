//! Per-worker transformation of raw rows into series for the active rule set

use std::sync::Arc;

use streamaggr_core::{
    AggrError, AggrResult, ArenaUsage, MetricName, MetricRow, Sample, SeriesArena,
};
use tracing::{error, trace};

use crate::lifecycle::StreamAggregation;

/// Converts batches of [`MetricRow`] into series and pushes them to the
/// active rule set.
///
/// Each ingestion worker owns one context. Buffers are reused across
/// batches, so once they have grown to the usual batch shape a push does
/// not allocate.
pub struct StreamAggrCtx {
    aggregation: Arc<StreamAggregation>,
    mn: MetricName,
    arena: SeriesArena,
}

impl StreamAggrCtx {
    pub fn new(aggregation: Arc<StreamAggregation>) -> Self {
        Self {
            aggregation,
            mn: MetricName::new(),
            arena: SeriesArena::new(),
        }
    }

    /// Push a batch of rows to the active rule set.
    ///
    /// On return `match_idxs` holds one entry per row: 1 if the row matched
    /// an aggregation rule, 0 otherwise. Without an active rule set every
    /// entry is 0 and nothing is pushed.
    ///
    /// A row whose metric name cannot be decoded fails the whole batch with
    /// [`AggrError::InternalConsistency`]. The caller must not keep
    /// processing that batch.
    pub fn push(&mut self, rows: &[MetricRow], match_idxs: &mut Vec<u8>) -> AggrResult<()> {
        match_idxs.clear();
        match_idxs.resize(rows.len(), 0);

        let Some(instance) = self.aggregation.current_instance() else {
            return Ok(());
        };

        for row in rows {
            if let Err(e) = self.mn.unmarshal_raw(&row.metric_name_raw) {
                self.reset();
                error!(
                    "BUG: cannot unmarshal recently marshaled metric name: {}",
                    e
                );
                return Err(AggrError::internal_consistency(format!(
                    "cannot unmarshal recently marshaled metric name: {}",
                    e
                )));
            }

            let labels_from = self.arena.label_count();
            let samples_from = self.arena.sample_count();
            self.arena.push_metric_group(self.mn.metric_group());
            for tag in self.mn.tags() {
                self.arena.push_label(&tag.key, &tag.value);
            }
            self.arena.push_sample(Sample::new(row.timestamp, row.value));
            self.arena.push_series(labels_from, samples_from);
        }

        let batch = self.arena.batch();
        match_idxs.clear();
        match_idxs.resize(batch.len(), 0);
        if !batch.is_empty() {
            trace!(
                "Pushing {} series to rule set instance {}",
                batch.len(),
                instance.id()
            );
            instance.push(&batch, match_idxs.as_mut_slice());
        }
        drop(instance);

        self.reset();
        Ok(())
    }

    /// Clear every buffer, keeping capacity
    pub fn reset(&mut self) {
        self.mn.reset();
        self.arena.reset();
    }

    /// Sizes of the reusable buffers
    pub fn arena_usage(&self) -> ArenaUsage {
        self.arena.usage()
    }

    pub fn aggregation(&self) -> &Arc<StreamAggregation> {
        &self.aggregation
    }
}
