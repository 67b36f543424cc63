//! Row storage abstraction used by the feedback writer

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use streamaggr_core::{AggrError, AggrResult, MetricRow};
use tracing::debug;

/// Storage that accepts batches of rows
pub trait RowStorage: Send + Sync {
    /// Write a batch of rows in one call
    fn add_rows(&self, rows: &[MetricRow]) -> AggrResult<()>;
}

/// In-memory storage for tests and embedding without a real write path
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: Mutex<Vec<MetricRow>>,
    batches: AtomicU64,
    simulate_errors: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_simulate_errors(&self, simulate: bool) {
        self.simulate_errors.store(simulate, Ordering::Relaxed);
    }

    /// Copy of every row written so far
    pub fn rows(&self) -> Vec<MetricRow> {
        self.rows.lock().clone()
    }

    /// Number of successful `add_rows` calls
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.rows.lock().clear();
        self.batches.store(0, Ordering::Relaxed);
    }
}

impl RowStorage for MemoryStorage {
    fn add_rows(&self, rows: &[MetricRow]) -> AggrResult<()> {
        if self.simulate_errors.load(Ordering::Relaxed) {
            return Err(AggrError::storage_write("simulated storage error"));
        }

        debug!("Storing {} rows in memory", rows.len());
        self.rows.lock().extend_from_slice(rows);
        self.batches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamaggr_core::MetricName;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        let mn = MetricName::from_parts("cpu", &[("host", "a")]);
        storage
            .add_rows(&[MetricRow::new(&mn, 1000, 1.0), MetricRow::new(&mn, 2000, 2.0)])
            .unwrap();

        assert_eq!(storage.rows().len(), 2);
        assert_eq!(storage.batch_count(), 1);

        storage.set_simulate_errors(true);
        let err = storage.add_rows(&[MetricRow::new(&mn, 3000, 3.0)]).unwrap_err();
        assert!(matches!(err, AggrError::StorageWrite(_)));
        assert_eq!(storage.rows().len(), 2);

        storage.clear();
        assert!(storage.rows().is_empty());
        assert_eq!(storage.batch_count(), 0);
    }
}
