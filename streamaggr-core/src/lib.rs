//! # Stream Aggregation Core Library
//!
//! Shared data types for the stream aggregation ingest layer.
//!
//! ## Features
//!
//! - **Rows**: raw metric rows as produced by the ingestion pipeline
//! - **Metric names**: decoded metric identity and its raw binary codec
//! - **Series**: label-oriented time series backed by a reusable arena
//! - **Errors**: the error taxonomy shared by every component
//!
//! ## Architecture
//!
//! This library is shared between the ingest service and the aggregation
//! engines plugged into it, providing:
//! - A zero-copy series representation handed to engines
//! - An owned series representation returned by engines
//! - Consistent error categories for logging and metrics

pub mod error;
pub mod metric_name;
pub mod row;
pub mod series;
pub mod time;

// Re-export commonly used types
pub use error::{AggrError, AggrResult};
pub use metric_name::{MetricName, Tag};
pub use row::MetricRow;
pub use series::{
    ArenaUsage, Label, OwnedLabel, Sample, SeriesArena, SeriesBatch, SeriesRef, TimeSeries,
    METRIC_NAME_LABEL,
};

/// Version information for the stream aggregation crates
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
