//! Stream Aggregation Ingest Library
//!
//! This library connects a metric ingestion pipeline to a pluggable
//! aggregation engine: it manages the hot-reloadable rule set, turns raw
//! rows into series for the engine and writes aggregate output back to
//! storage.

// Core modules
pub mod config;
pub mod context;
pub mod engine;
pub mod feedback;
pub mod instance;
pub mod lifecycle;
pub mod metrics;
pub mod retention;
pub mod rules;
pub mod storage;

// Re-export commonly used types
pub use config::{FeedbackConfig, IngestConfig, StreamAggrConfig};
pub use context::StreamAggrCtx;
pub use engine::{AggregateSink, Aggregator, AggregatorFactory};
pub use feedback::FeedbackWriter;
pub use instance::RuleSetInstance;
pub use lifecycle::{ReloadHandle, ReloadOutcome, ReloadStatus, StreamAggregation};
pub use retention::InputRetention;
pub use rules::{check_config, AggregationRule, AggregatorOptions, RuleSetConfig};
pub use storage::{MemoryStorage, RowStorage};
