//! Rule-set lifecycle manager
//!
//! Owns the active [`RuleSetInstance`] and replaces it when the rule file
//! changes. Ingestion workers read the active pointer without locking.
//! Reloads and shutdown are serialized with each other:
//!
//! 1. A trigger (SIGHUP, check interval or [`ReloadHandle`]) wakes the
//!    background listener
//! 2. The rule file is parsed and a candidate engine is built
//! 3. An unchanged rule set stops the candidate and keeps the active one
//! 4. A changed rule set is swapped in, then the previous instance is
//!    stopped once in-flight pushes have drained
//!
//! A rule file that fails to load never replaces the active instance.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use prometheus::Registry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use streamaggr_core::{AggrError, AggrResult, MetricRow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StreamAggrConfig;
use crate::engine::{AggregateSink, AggregatorFactory};
use crate::instance::{stop_when_drained, RuleSetInstance};
use crate::metrics::{ReloadMetrics, ReloadMetricsSnapshot};
use crate::retention::InputRetention;
use crate::rules::{load_rules_file, AggregatorOptions};

/// Everything needed to turn the rule file into a running instance
struct RuleSetLoader {
    path: PathBuf,
    options: AggregatorOptions,
    factory: Arc<dyn AggregatorFactory>,
    sink: Arc<dyn AggregateSink>,
}

impl RuleSetLoader {
    fn load(&self) -> AggrResult<RuleSetInstance> {
        let config = load_rules_file(&self.path, self.options.clone())?;
        let aggregator = self.factory.build(&config, self.sink.clone())?;
        Ok(RuleSetInstance::new(config, aggregator))
    }
}

/// Result of a single reload attempt
#[derive(Debug)]
pub enum ReloadOutcome {
    /// No rule file is configured
    Disabled,
    /// The manager has been shut down
    ShutDown,
    /// The rule file failed to load; the active instance was kept
    Failed(AggrError),
    /// The rule file is equal to the active one
    Unchanged { instance_id: u64 },
    /// A new instance replaced the previous one
    Swapped { previous_id: u64, current_id: u64 },
}

impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReloadOutcome::Unchanged { .. } | ReloadOutcome::Swapped { .. }
        )
    }
}

/// Point-in-time view of the manager, for logs and diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadStatus {
    pub enabled: bool,
    pub config_path: Option<PathBuf>,
    pub active_instance_id: Option<u64>,
    pub rules: usize,
    pub metrics: ReloadMetricsSnapshot,
}

/// Requests a reload from the background listener
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Ask for a reload without waiting for it.
    ///
    /// Returns false once the listener has exited. A request made while
    /// another one is still pending is folded into it.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Reload already pending, folding request");
                true
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

/// Holder of the active rule set, shared by every ingestion worker
pub struct StreamAggregation {
    loader: Option<RuleSetLoader>,
    active: ArcSwapOption<RuleSetInstance>,
    retention: InputRetention,
    metrics: ReloadMetrics,
    reload_lock: Mutex<()>,
    shut_down: AtomicBool,
    reload_tx: mpsc::Sender<()>,
    shutdown_token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl StreamAggregation {
    /// Load the rule file, install the first instance and start the reload
    /// listener.
    ///
    /// A rule file that fails to load is returned as an error. Without a
    /// configured rule file the manager stays disabled: every push is a
    /// pass-through with an all-zero bitmap.
    pub async fn initialize(
        config: &StreamAggrConfig,
        factory: Arc<dyn AggregatorFactory>,
        sink: Arc<dyn AggregateSink>,
        registry: &Registry,
    ) -> AggrResult<Arc<Self>> {
        if config.keep_input && config.drop_input {
            return Err(AggrError::configuration(
                "keep_input and drop_input cannot both be enabled",
            ));
        }

        let metrics = ReloadMetrics::new(registry)?;
        let loader = config.config_path.clone().map(|path| RuleSetLoader {
            path,
            options: config.aggregator_options(),
            factory,
            sink,
        });

        let active = ArcSwapOption::empty();
        match &loader {
            Some(loader) => {
                info!(
                    "Loading stream aggregation rules from {}",
                    loader.path.display()
                );
                let instance = loader.load()?;
                info!(
                    "Loaded {} stream aggregation rules from {}",
                    instance.config().len(),
                    loader.path.display()
                );
                active.store(Some(Arc::new(instance)));
                metrics.record_success();
            }
            None => info!("Stream aggregation disabled: no rule file configured"),
        }

        let (reload_tx, reload_rx) = mpsc::channel(1);
        let manager = Arc::new(Self {
            loader,
            active,
            retention: config.retention(),
            metrics,
            reload_tx,
            reload_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            listener: Mutex::new(None),
        });

        let handle = tokio::spawn(run_listener(
            Arc::downgrade(&manager),
            reload_rx,
            manager.shutdown_token.clone(),
            config.check_interval(),
            config.reload_on_sighup,
        ));
        *manager.listener.lock() = Some(handle);

        Ok(manager)
    }

    /// Whether a rule file is configured
    pub fn is_enabled(&self) -> bool {
        self.loader.is_some()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.loader.as_ref().map(|loader| loader.path.as_path())
    }

    /// The active instance, if any. Holding the returned `Arc` delays the
    /// stop of a superseded instance until it is dropped.
    pub fn current_instance(&self) -> Option<Arc<RuleSetInstance>> {
        self.active.load_full()
    }

    pub fn retention(&self) -> InputRetention {
        self.retention
    }

    /// Drop input rows according to the retention policy.
    ///
    /// Disabled aggregation keeps every row.
    pub fn retain_input(&self, rows: &mut Vec<MetricRow>, match_idxs: &[u8]) {
        if self.is_enabled() {
            self.retention.retain_rows(rows, match_idxs);
        }
    }

    pub fn metrics(&self) -> &ReloadMetrics {
        &self.metrics
    }

    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle {
            tx: self.reload_tx.clone(),
        }
    }

    pub fn status(&self) -> ReloadStatus {
        let active = self.active.load_full();
        ReloadStatus {
            enabled: self.is_enabled(),
            config_path: self.config_path().map(Path::to_path_buf),
            active_instance_id: active.as_ref().map(|instance| instance.id()),
            rules: active.as_ref().map_or(0, |instance| instance.config().len()),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Re-read the rule file and install it if it changed.
    ///
    /// Blocks until a superseded instance has been stopped. Call it from a
    /// blocking context.
    ///
    /// An unchanged rule file still counts as a successful reload and
    /// refreshes the success timestamp.
    pub fn reload(&self) -> ReloadOutcome {
        let Some(loader) = &self.loader else {
            debug!("Ignoring reload request: stream aggregation is disabled");
            return ReloadOutcome::Disabled;
        };

        let _guard = self.reload_lock.lock();
        if self.shut_down.load(Ordering::Acquire) {
            debug!("Ignoring reload request: stream aggregation is shut down");
            return ReloadOutcome::ShutDown;
        }

        self.metrics.record_attempt();
        info!(
            "Reloading stream aggregation rules from {}",
            loader.path.display()
        );

        let candidate = match loader.load() {
            Ok(candidate) => candidate,
            Err(e) => {
                self.metrics.record_failure();
                error!(
                    "Failed to reload stream aggregation rules from {}, keeping previous rules: {}",
                    loader.path.display(),
                    e
                );
                return ReloadOutcome::Failed(e);
            }
        };

        let unchanged_id = (*self.active.load())
            .as_ref()
            .filter(|current| current.same_config(candidate.config()))
            .map(|current| current.id());

        if let Some(instance_id) = unchanged_id {
            candidate.stop();
            self.metrics.record_success();
            info!(
                "Stream aggregation rules in {} are unchanged",
                loader.path.display()
            );
            return ReloadOutcome::Unchanged { instance_id };
        }

        let current_id = candidate.id();
        let rules = candidate.config().len();
        let previous = self.active.swap(Some(Arc::new(candidate)));
        self.metrics.record_success();
        info!(
            "Installed {} stream aggregation rules from {}",
            rules,
            loader.path.display()
        );

        let previous_id = match previous {
            Some(previous) => {
                let id = previous.id();
                stop_when_drained(previous);
                id
            }
            None => 0,
        };

        ReloadOutcome::Swapped {
            previous_id,
            current_id,
        }
    }

    /// Stop the listener, take the active instance and stop it once drained.
    ///
    /// The reload lock is taken on the blocking pool, so a reload that is
    /// still draining elsewhere does not stall the runtime. Safe to call
    /// more than once.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutdown_token.cancel();

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                error!("Stream aggregation reload listener failed: {}", e);
            }
        }

        let manager = self.clone();
        let stopped = tokio::task::spawn_blocking(move || {
            let previous = {
                let _guard = manager.reload_lock.lock();
                manager.shut_down.store(true, Ordering::Release);
                manager.active.swap(None)
            };

            if let Some(instance) = previous {
                info!("Stopping stream aggregation instance {}", instance.id());
                stop_when_drained(instance);
            }
        })
        .await;

        if let Err(e) = stopped {
            error!("Failed to stop stream aggregation instance: {}", e);
        }
    }
}

impl Drop for StreamAggregation {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

async fn run_listener(
    manager: Weak<StreamAggregation>,
    mut reload_rx: mpsc::Receiver<()>,
    shutdown_token: CancellationToken,
    check_interval: Option<Duration>,
    reload_on_sighup: bool,
) {
    let mut hangup = if reload_on_sighup {
        hangup_signal()
    } else {
        None
    };
    let mut ticker = check_interval.map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    debug!("Stream aggregation reload listener started");
    loop {
        let trigger = tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => break,
            request = reload_rx.recv() => match request {
                Some(()) => "reload request",
                None => break,
            },
            _ = recv_hangup(&mut hangup) => "SIGHUP",
            _ = tick(&mut ticker) => "config check interval",
        };

        let Some(manager) = manager.upgrade() else {
            break;
        };
        debug!("Stream aggregation reload triggered by {}", trigger);
        match tokio::task::spawn_blocking(move || manager.reload()).await {
            Ok(outcome) => debug!("Reload finished: {:?}", outcome),
            Err(e) => error!("Stream aggregation reload task failed: {}", e),
        }
    }
    debug!("Stream aggregation reload listener stopped");
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
type HangupSignal = tokio::signal::unix::Signal;

#[cfg(not(unix))]
type HangupSignal = ();

#[cfg(unix)]
fn hangup_signal() -> Option<HangupSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::hangup()) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("Cannot listen for SIGHUP, rule reload on signal disabled: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn hangup_signal() -> Option<HangupSignal> {
    None
}

#[cfg(unix)]
async fn recv_hangup(hangup: &mut Option<HangupSignal>) {
    if let Some(signal) = hangup {
        if signal.recv().await.is_some() {
            return;
        }
        *hangup = None;
    }
    std::future::pending().await
}

#[cfg(not(unix))]
async fn recv_hangup(_hangup: &mut Option<HangupSignal>) {
    std::future::pending().await
}
