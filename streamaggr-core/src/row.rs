//! Raw metric rows as they flow through the ingestion pipeline

use serde::{Deserialize, Serialize};

use crate::error::AggrResult;
use crate::metric_name::MetricName;

/// One sample of one series, with the series identity still in raw form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Raw metric name, see [`MetricName::marshal_raw`]
    pub metric_name_raw: Vec<u8>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub value: f64,
}

impl MetricRow {
    /// Create a row from a decoded metric name
    pub fn new(mn: &MetricName, timestamp: i64, value: f64) -> Self {
        let mut metric_name_raw = Vec::new();
        mn.marshal_raw(&mut metric_name_raw);
        Self {
            metric_name_raw,
            timestamp,
            value,
        }
    }

    /// Decode the row identity into a fresh metric name
    pub fn metric_name(&self) -> AggrResult<MetricName> {
        let mut mn = MetricName::new();
        mn.unmarshal_raw(&self.metric_name_raw)?;
        Ok(mn)
    }
}
