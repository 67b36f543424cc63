//! Seams between the ingest layer and the aggregation engine.
//!
//! The engine itself (per-output state, interval flushing, dedup) lives
//! behind these traits. The ingest layer only builds engines from a rule
//! set, pushes series into them and stops them.

use std::sync::Arc;

use streamaggr_core::{AggrResult, SeriesBatch, TimeSeries};

use crate::rules::RuleSetConfig;

/// A running aggregation engine built from one rule set
pub trait Aggregator: Send + Sync {
    /// Feed a batch of series.
    ///
    /// `match_idxs` has one entry per series in `batch`, zeroed by the
    /// caller. The engine sets entry `i` to 1 when series `i` matched at
    /// least one rule.
    fn push(&self, batch: &SeriesBatch<'_>, match_idxs: &mut [u8]);

    /// Flush pending state and release resources. Called exactly once.
    fn stop(&self);
}

/// Receives aggregate output from an engine
pub trait AggregateSink: Send + Sync {
    fn push_aggregates(&self, series: &[TimeSeries]);
}

/// Builds engines from parsed rule sets
pub trait AggregatorFactory: Send + Sync {
    fn build(
        &self,
        config: &RuleSetConfig,
        sink: Arc<dyn AggregateSink>,
    ) -> AggrResult<Box<dyn Aggregator>>;
}
