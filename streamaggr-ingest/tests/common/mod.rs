//! Shared test doubles for the ingest integration tests

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use streamaggr_core::{AggrResult, MetricName, MetricRow, SeriesBatch, TimeSeries};
use streamaggr_ingest::{
    AggregateSink, Aggregator, AggregatorFactory, ReloadOutcome, RuleSetConfig, StreamAggregation,
};
use tempfile::NamedTempFile;

pub const CPU_RULES: &str = "- match: cpu\n  interval: 1m\n  outputs: [avg]\n";
pub const MEM_RULES: &str = "- match: mem\n  interval: 1m\n  outputs: [max]\n";
pub const FLUSHING_RULES: &str =
    "- match: cpu\n  interval: 1m\n  outputs: [count_samples]\n  flush_on_shutdown: true\n";

/// What happened to one built aggregator
#[derive(Debug, Default)]
pub struct AggregatorRecord {
    pub series_pushed: AtomicUsize,
    pub pushes_after_stop: AtomicUsize,
    pub stops: AtomicUsize,
    pub stopped: AtomicBool,
    /// Id of the active instance when `stop` was called
    pub active_at_stop: Mutex<Option<Option<u64>>>,
    pub pushed: Mutex<Vec<TimeSeries>>,
}

/// Aggregator that flags series whose metric group appears in a rule's
/// `match` list and records everything it sees.
pub struct RecordingAggregator {
    matchers: Vec<String>,
    flush_on_shutdown: bool,
    record: Arc<AggregatorRecord>,
    sink: Arc<dyn AggregateSink>,
    manager: Arc<Mutex<Option<Weak<StreamAggregation>>>>,
}

impl Aggregator for RecordingAggregator {
    fn push(&self, batch: &SeriesBatch<'_>, match_idxs: &mut [u8]) {
        assert_eq!(batch.len(), match_idxs.len());
        assert!(match_idxs.iter().all(|&m| m == 0));
        if self.record.stopped.load(Ordering::SeqCst) {
            self.record.pushes_after_stop.fetch_add(1, Ordering::SeqCst);
        }

        for (i, series) in batch.iter().enumerate() {
            let group = series.metric_group().unwrap_or_default();
            if self.matchers.iter().any(|m| m.as_bytes() == group) {
                match_idxs[i] = 1;
            }
        }
        self.record
            .series_pushed
            .fetch_add(batch.len(), Ordering::SeqCst);
        self.record
            .pushed
            .lock()
            .unwrap()
            .extend(batch.to_owned_series());
    }

    fn stop(&self) {
        let active = self
            .manager
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|m| m.current_instance().map(|i| i.id()));
        *self.record.active_at_stop.lock().unwrap() = active;
        self.record.stopped.store(true, Ordering::SeqCst);
        self.record.stops.fetch_add(1, Ordering::SeqCst);

        if self.flush_on_shutdown {
            let count = self.record.series_pushed.load(Ordering::SeqCst);
            let series = TimeSeries::new()
                .with_label("__name__", "cpu:1m_count_samples")
                .with_sample(0, count as f64);
            self.sink.push_aggregates(&[series]);
        }
    }
}

/// Factory keeping a record per built aggregator, in build order
#[derive(Default)]
pub struct RecordingFactory {
    pub records: Mutex<Vec<Arc<AggregatorRecord>>>,
    manager: Arc<Mutex<Option<Weak<StreamAggregation>>>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let aggregators look up the active instance when they are stopped
    pub fn attach(&self, manager: &Arc<StreamAggregation>) {
        *self.manager.lock().unwrap() = Some(Arc::downgrade(manager));
    }

    pub fn built(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn record(&self, index: usize) -> Arc<AggregatorRecord> {
        self.records.lock().unwrap()[index].clone()
    }
}

impl AggregatorFactory for RecordingFactory {
    fn build(
        &self,
        config: &RuleSetConfig,
        sink: Arc<dyn AggregateSink>,
    ) -> AggrResult<Box<dyn Aggregator>> {
        let record = Arc::new(AggregatorRecord::default());
        self.records.lock().unwrap().push(record.clone());
        Ok(Box::new(RecordingAggregator {
            matchers: config
                .rules
                .iter()
                .flat_map(|rule| rule.matchers.iter().cloned())
                .collect(),
            flush_on_shutdown: config.rules.iter().any(|rule| rule.flush_on_shutdown),
            record,
            sink,
            manager: self.manager.clone(),
        }))
    }
}

/// Sink that keeps aggregate output in memory
#[derive(Default)]
pub struct CollectingSink {
    pub series: Mutex<Vec<TimeSeries>>,
}

impl AggregateSink for CollectingSink {
    fn push_aggregates(&self, series: &[TimeSeries]) {
        self.series.lock().unwrap().extend_from_slice(series);
    }
}

pub fn rules_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

pub fn rewrite(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
}

pub fn row(group: &str, tags: &[(&str, &str)], timestamp: i64, value: f64) -> MetricRow {
    MetricRow::new(&MetricName::from_parts(group, tags), timestamp, value)
}

/// Run a reload off the async executor threads
pub async fn reload(manager: &Arc<StreamAggregation>) -> ReloadOutcome {
    let manager = manager.clone();
    tokio::task::spawn_blocking(move || manager.reload())
        .await
        .unwrap()
}

/// Poll `condition` until it holds or the timeout expires
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
