//! A running rule set: the parsed configuration plus the engine built from it

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use streamaggr_core::SeriesBatch;
use tracing::{debug, info, warn};

use crate::engine::Aggregator;
use crate::rules::RuleSetConfig;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);
const DRAIN_WARN_AFTER: Duration = Duration::from_secs(5);

/// Immutable once built. The lifecycle manager swaps whole instances.
pub struct RuleSetInstance {
    id: u64,
    config: RuleSetConfig,
    aggregator: Box<dyn Aggregator>,
    stopped: AtomicBool,
}

impl RuleSetInstance {
    pub fn new(config: RuleSetConfig, aggregator: Box<dyn Aggregator>) -> Self {
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Built rule set instance {} with {} rules", id, config.len());
        Self {
            id,
            config,
            aggregator,
            stopped: AtomicBool::new(false),
        }
    }

    /// Process-unique identifier, useful in logs and tests
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &RuleSetConfig {
        &self.config
    }

    /// Whether both instances were built from equal configurations
    pub fn same_config(&self, other: &RuleSetConfig) -> bool {
        self.config == *other
    }

    pub fn push(&self, batch: &SeriesBatch<'_>, match_idxs: &mut [u8]) {
        self.aggregator.push(batch, match_idxs);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the engine. Only the first call reaches it.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Stopping rule set instance {}", self.id);
        self.aggregator.stop();
    }
}

impl fmt::Debug for RuleSetInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSetInstance")
            .field("id", &self.id)
            .field("rules", &self.config.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Stop an instance once every other handle to it has been dropped.
///
/// Pushes hold an `Arc` for the duration of the call, so a strong count of
/// one means no push is in flight and none can start: the instance is no
/// longer reachable from the active pointer. Blocks the calling thread.
pub fn stop_when_drained(instance: Arc<RuleSetInstance>) {
    let started = Instant::now();
    let mut warned = false;

    while Arc::strong_count(&instance) > 1 {
        if !warned && started.elapsed() >= DRAIN_WARN_AFTER {
            warn!(
                "Rule set instance {} still has {} in-flight users after {:?}",
                instance.id(),
                Arc::strong_count(&instance) - 1,
                started.elapsed()
            );
            warned = true;
        }
        thread::sleep(DRAIN_POLL_INTERVAL);
    }

    instance.stop();
    info!(
        "Rule set instance {} stopped after draining for {:?}",
        instance.id(),
        started.elapsed()
    );
}
