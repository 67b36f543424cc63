//! Label-oriented time series and the reusable arena backing them.
//!
//! Series handed to the aggregation engine are views into a
//! [`SeriesArena`]: label names and values are byte ranges inside one shared
//! buffer, samples and series are ranges inside reusable vectors. Views
//! borrow the arena, so they cannot outlive the next [`SeriesArena::reset`].
//!
//! ```text
//! buf:     [cpu][host][a][cpu][host][b]
//! labels:  {__name__ -> 0..3} {3..7 -> 7..8} {__name__ -> 8..11} {11..15 -> 15..16}
//! samples: (1000, 1.0) (2000, 2.0)
//! series:  {labels 0..2, samples 0..1} {labels 2..4, samples 1..2}
//! ```

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Label name carrying the metric group of a series
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single (timestamp, value) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Borrowed label whose name and value point into an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> Label<'a> {
    /// Whether this label carries the metric group
    pub fn is_metric_name(&self) -> bool {
        self.name == METRIC_NAME_LABEL.as_bytes()
    }

    pub fn to_owned_label(&self) -> OwnedLabel {
        OwnedLabel {
            name: String::from_utf8_lossy(self.name).into_owned(),
            value: String::from_utf8_lossy(self.value).into_owned(),
        }
    }
}

/// Owned label, used for series that leave the arena
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnedLabel {
    pub name: String,
    pub value: String,
}

/// Owned time series, as emitted by the aggregation engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Vec<OwnedLabel>,
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a label
    pub fn with_label<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.labels.push(OwnedLabel {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Append a sample
    pub fn with_sample(mut self, timestamp: i64, value: f64) -> Self {
        self.samples.push(Sample::new(timestamp, value));
        self
    }

    /// Value of the `__name__` label, if any
    pub fn metric_name(&self) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.name == METRIC_NAME_LABEL)
            .map(|label| label.value.as_str())
    }
}

/// Name of an arena label: either the implicit metric-name label or a range
/// inside the byte buffer.
#[derive(Debug, Clone)]
enum NameSpan {
    MetricName,
    Bytes(Range<usize>),
}

#[derive(Debug, Clone)]
struct LabelSpan {
    name: NameSpan,
    value: Range<usize>,
}

#[derive(Debug, Clone)]
struct SeriesSpan {
    labels: Range<usize>,
    samples: Range<usize>,
}

/// Lengths and capacities of the arena buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaUsage {
    pub bytes_len: usize,
    pub bytes_capacity: usize,
    pub labels_len: usize,
    pub labels_capacity: usize,
    pub samples_len: usize,
    pub samples_capacity: usize,
    pub series_len: usize,
    pub series_capacity: usize,
}

impl ArenaUsage {
    /// Whether every buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes_len == 0 && self.labels_len == 0 && self.samples_len == 0 && self.series_len == 0
    }

    /// Capacities only, for comparing allocation behaviour across batches
    pub fn capacities(&self) -> [usize; 4] {
        [
            self.bytes_capacity,
            self.labels_capacity,
            self.samples_capacity,
            self.series_capacity,
        ]
    }
}

/// Reusable storage for one batch of series.
///
/// Each ingestion worker owns one arena and resets it after every batch.
#[derive(Debug, Default)]
pub struct SeriesArena {
    buf: Vec<u8>,
    labels: Vec<LabelSpan>,
    samples: Vec<Sample>,
    series: Vec<SeriesSpan>,
}

impl SeriesArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of labels appended since the last reset
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Number of samples appended since the last reset
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of series appended since the last reset
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    fn copy_bytes(&mut self, bytes: &[u8]) -> Range<usize> {
        let start = self.buf.len();
        self.buf.extend_from_slice(bytes);
        start..self.buf.len()
    }

    /// Append a `__name__` label whose value is copied into the arena
    pub fn push_metric_group(&mut self, metric_group: &[u8]) {
        let value = self.copy_bytes(metric_group);
        self.labels.push(LabelSpan {
            name: NameSpan::MetricName,
            value,
        });
    }

    /// Append a label whose name and value are copied into the arena
    pub fn push_label(&mut self, name: &[u8], value: &[u8]) {
        let name = self.copy_bytes(name);
        let value = self.copy_bytes(value);
        self.labels.push(LabelSpan {
            name: NameSpan::Bytes(name),
            value,
        });
    }

    pub fn push_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Close a series made of every label and sample appended since the
    /// given offsets.
    pub fn push_series(&mut self, labels_from: usize, samples_from: usize) {
        debug_assert!(labels_from <= self.labels.len());
        debug_assert!(samples_from <= self.samples.len());
        self.series.push(SeriesSpan {
            labels: labels_from..self.labels.len(),
            samples: samples_from..self.samples.len(),
        });
    }

    /// View over every series appended since the last reset
    pub fn batch(&self) -> SeriesBatch<'_> {
        SeriesBatch { arena: self }
    }

    /// Truncate all buffers, keeping their capacity
    pub fn reset(&mut self) {
        self.buf.clear();
        self.labels.clear();
        self.samples.clear();
        self.series.clear();
    }

    pub fn usage(&self) -> ArenaUsage {
        ArenaUsage {
            bytes_len: self.buf.len(),
            bytes_capacity: self.buf.capacity(),
            labels_len: self.labels.len(),
            labels_capacity: self.labels.capacity(),
            samples_len: self.samples.len(),
            samples_capacity: self.samples.capacity(),
            series_len: self.series.len(),
            series_capacity: self.series.capacity(),
        }
    }

    fn label(&self, span: &LabelSpan) -> Label<'_> {
        let name = match &span.name {
            NameSpan::MetricName => METRIC_NAME_LABEL.as_bytes(),
            NameSpan::Bytes(range) => &self.buf[range.clone()],
        };
        Label {
            name,
            value: &self.buf[span.value.clone()],
        }
    }
}

/// Borrowed batch of series living in a [`SeriesArena`]
#[derive(Debug, Clone, Copy)]
pub struct SeriesBatch<'a> {
    arena: &'a SeriesArena,
}

impl<'a> SeriesBatch<'a> {
    pub fn len(&self) -> usize {
        self.arena.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.series.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<SeriesRef<'a>> {
        let arena = self.arena;
        arena.series.get(index).map(|span| SeriesRef { arena, span })
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = SeriesRef<'a>> + 'a {
        let arena = self.arena;
        arena.series.iter().map(move |span| SeriesRef { arena, span })
    }

    /// Copy every series out of the arena
    pub fn to_owned_series(&self) -> Vec<TimeSeries> {
        self.iter().map(|series| series.to_owned_series()).collect()
    }
}

/// Borrowed view of one series in a [`SeriesBatch`]
#[derive(Debug, Clone, Copy)]
pub struct SeriesRef<'a> {
    arena: &'a SeriesArena,
    span: &'a SeriesSpan,
}

impl<'a> SeriesRef<'a> {
    pub fn labels(&self) -> impl ExactSizeIterator<Item = Label<'a>> + 'a {
        let arena = self.arena;
        arena.labels[self.span.labels.clone()]
            .iter()
            .map(move |span| arena.label(span))
    }

    pub fn samples(&self) -> &'a [Sample] {
        &self.arena.samples[self.span.samples.clone()]
    }

    /// Value of the `__name__` label, if any
    pub fn metric_group(&self) -> Option<&'a [u8]> {
        self.labels()
            .find(|label| label.is_metric_name())
            .map(|label| label.value)
    }

    pub fn to_owned_series(&self) -> TimeSeries {
        TimeSeries {
            labels: self.labels().map(|label| label.to_owned_label()).collect(),
            samples: self.samples().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(arena: &mut SeriesArena, hosts: &[&str]) {
        for (i, host) in hosts.iter().enumerate() {
            let labels_from = arena.label_count();
            let samples_from = arena.sample_count();
            arena.push_metric_group(b"cpu");
            arena.push_label(b"host", host.as_bytes());
            arena.push_sample(Sample::new(1000 * (i as i64 + 1), i as f64 + 1.0));
            arena.push_series(labels_from, samples_from);
        }
    }

    #[test]
    fn test_batch_views() {
        let mut arena = SeriesArena::new();
        fill(&mut arena, &["a", "b"]);

        let batch = arena.batch();
        assert_eq!(batch.len(), 2);

        let first = batch.get(0).unwrap();
        let labels: Vec<Label<'_>> = first.labels().collect();
        assert_eq!(labels.len(), 2);
        assert!(labels[0].is_metric_name());
        assert_eq!(labels[0].value, b"cpu");
        assert_eq!(labels[1].name, b"host");
        assert_eq!(labels[1].value, b"a");
        assert_eq!(first.samples(), &[Sample::new(1000, 1.0)]);

        let second = batch.get(1).unwrap();
        assert_eq!(second.metric_group(), Some(&b"cpu"[..]));
        assert_eq!(second.samples()[0].timestamp, 2000);
        assert!(batch.get(2).is_none());
    }

    #[test]
    fn test_metric_group_is_not_stored_as_name_bytes() {
        let mut arena = SeriesArena::new();
        fill(&mut arena, &["a"]);
        // "cpu" + "host" + "a"
        assert_eq!(arena.usage().bytes_len, 8);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut arena = SeriesArena::new();
        fill(&mut arena, &["a", "b", "c"]);
        let before = arena.usage();

        arena.reset();
        let after = arena.usage();
        assert!(after.is_empty());
        assert_eq!(after.capacities(), before.capacities());

        fill(&mut arena, &["d", "e", "f"]);
        assert_eq!(arena.usage().capacities(), before.capacities());
    }

    #[test]
    fn test_owned_copy() {
        let mut arena = SeriesArena::new();
        fill(&mut arena, &["a"]);
        let owned = arena.batch().to_owned_series();
        arena.reset();

        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].metric_name(), Some("cpu"));
        assert_eq!(owned[0].labels[1].name, "host");
        assert_eq!(owned[0].samples, vec![Sample::new(1000, 1.0)]);
    }

    #[test]
    fn test_time_series_builder() {
        let series = TimeSeries::new()
            .with_label(METRIC_NAME_LABEL, "cpu:avg")
            .with_label("host", "a")
            .with_sample(5000, 0.5);
        assert_eq!(series.metric_name(), Some("cpu:avg"));
        assert_eq!(series.samples.len(), 1);
    }
}
