//! Tidy Worker
//!
//! Background task that periodically removes expired and disposed entries,
//! then enforces soft limits, the age and idle limits and the memory target.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheItem, InMemoryCache, Reduction};
use crate::cancel::CancellationToken;
use crate::error::{CacheError, Result};
use crate::tasks::lifecycle::HostedService;

// == Tidy State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TidyState {
    /// Waiting for the next tick
    Idle,
    /// A tidy cycle is in progress
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for TidyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// == Tidy Report ==
/// Entries removed by each step of one tidy cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TidyReport {
    pub expired: usize,
    pub disposed: usize,
    pub over_count: usize,
    pub over_size: usize,
    pub aged: usize,
    pub idle: usize,
    pub memory: usize,
    /// The cycle stopped early
    pub cancelled: bool,
}

impl TidyReport {
    pub fn total(&self) -> usize {
        self.expired
            + self.disposed
            + self.over_count
            + self.over_size
            + self.aged
            + self.idle
            + self.memory
    }
}

/// Runs one tidy cycle against `cache`.
///
/// Steps run in order: expired, disposed, soft count, soft size, age, idle,
/// memory. Disabled limits are skipped. Cancellation is checked between
/// victims, so a cancelled cycle leaves every removal it made intact.
pub fn tidy_once<T: CacheItem>(cache: &InMemoryCache<T>, cancel: &CancellationToken) -> TidyReport {
    let policy = cache.policy();
    let options = cache.options();
    let mut report = TidyReport::default();

    let finished = record(&mut report.expired, policy.remove_expired(cancel))
        && record(&mut report.disposed, policy.remove_disposed(cancel))
        && (options.soft_count_limit == 0
            || record(
                &mut report.over_count,
                policy.reduce_count(options.soft_count_limit, cancel),
            ))
        && (options.soft_size_limit == 0
            || record(
                &mut report.over_size,
                policy.reduce_size(options.soft_size_limit, cancel),
            ))
        && options
            .age_limit
            .map_or(true, |limit| record(&mut report.aged, policy.reduce_old(limit, cancel)))
        && options.idle_limit.map_or(true, |limit| {
            record(&mut report.idle, policy.reduce_unpopular(limit, cancel))
        })
        && match options.memory_limit {
            Some(limit) if policy.has_memory_probe() => {
                record(&mut report.memory, policy.reduce_memory(limit, cancel))
            }
            _ => true,
        };

    report.cancelled = !finished;
    report
}

/// Stores the removal count; false when the step was cancelled.
fn record(slot: &mut usize, reduction: Reduction) -> bool {
    *slot = reduction.removed;
    !reduction.cancelled
}

struct Control {
    state: watch::Sender<TidyState>,
    paused: AtomicBool,
}

impl Control {
    fn new(initial: TidyState) -> Self {
        let (state, _rx) = watch::channel(initial);
        Self {
            state,
            paused: AtomicBool::new(false),
        }
    }
}

/// Spawns a background task that tidies `cache` every `interval`.
///
/// The task ends when `cancel` fires or the cache is disposed.
///
/// # Arguments
/// * `cache` - Cache to tidy; the task holds a clone
/// * `interval` - Time between cycles, the first cycle runs after one interval
/// * `cancel` - Token that stops the task
///
/// # Returns
/// A JoinHandle for the spawned task.
///
/// # Example
/// ```ignore
/// let cancel = CancellationToken::new();
/// let handle = spawn_tidy_task(cache.clone(), Duration::from_secs(1), cancel.clone());
/// // Later, during shutdown:
/// cancel.cancel();
/// handle.await?;
/// ```
pub fn spawn_tidy_task<T: CacheItem>(
    cache: InMemoryCache<T>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let control = Arc::new(Control::new(TidyState::Idle));
    tokio::spawn(run_loop(cache, interval, cancel, control))
}

async fn run_loop<T: CacheItem>(
    cache: InMemoryCache<T>,
    interval: Duration,
    cancel: CancellationToken,
    control: Arc<Control>,
) {
    let shutdown = cache.shutdown_token().clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    info!(interval_ms = interval.as_millis() as u64, "Starting tidy worker");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if control.paused.load(Ordering::Acquire) {
            continue;
        }

        control.state.send_replace(TidyState::Running);
        // A cycle walks the whole store and may dispose items, so it runs on
        // the blocking pool; `cancel` still reaches it between victims
        let cycle = {
            let cache = cache.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || tidy_once(&cache, &cancel))
        };
        let report = match cycle.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Tidy cycle task failed");
                TidyReport::default()
            }
        };
        if report.total() > 0 {
            info!(
                removed = report.total(),
                expired = report.expired,
                disposed = report.disposed,
                over_count = report.over_count,
                over_size = report.over_size,
                aged = report.aged,
                idle = report.idle,
                memory = report.memory,
                "Tidy cycle finished"
            );
        } else {
            debug!("Tidy cycle: nothing to remove");
        }

        let next = if control.paused.load(Ordering::Acquire) {
            TidyState::Paused
        } else {
            TidyState::Idle
        };
        control.state.send_replace(next);
    }

    control.state.send_replace(TidyState::Stopped);
    info!("Tidy worker stopped");
}

// == Tidy Worker ==
/// The tidy task as a [`HostedService`] that can be paused and resumed.
pub struct TidyWorker<T> {
    cache: InMemoryCache<T>,
    interval: Duration,
    control: Arc<Control>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<T: CacheItem> TidyWorker<T> {
    /// Creates a stopped worker using the cache's `tidy_interval`.
    pub fn new(cache: InMemoryCache<T>) -> Self {
        let interval = cache.options().tidy_interval;
        Self {
            cache,
            interval,
            control: Arc::new(Control::new(TidyState::Stopped)),
            running: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn state(&self) -> TidyState {
        *self.control.state.borrow()
    }

    /// Watches state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<TidyState> {
        self.control.state.subscribe()
    }

    /// Runs one cycle now, outside the schedule.
    pub fn run_once(&self) -> Result<TidyReport> {
        if self.cache.is_disposed() {
            return Err(CacheError::Disposed);
        }
        Ok(tidy_once(&self.cache, &CancellationToken::new()))
    }
}

#[async_trait]
impl<T: CacheItem> HostedService for TidyWorker<T> {
    fn name(&self) -> &'static str {
        "tidy"
    }

    async fn start(&self) -> Result<()> {
        if self.cache.is_disposed() {
            return Err(CacheError::Disposed);
        }
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        self.control.paused.store(false, Ordering::Release);
        self.control.state.send_replace(TidyState::Idle);
        let handle = tokio::spawn(run_loop(
            self.cache.clone(),
            self.interval,
            cancel.clone(),
            self.control.clone(),
        ));
        *running = Some((cancel, handle));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let running = self.running.lock().take();
        let Some((cancel, handle)) = running else {
            return Ok(());
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "Tidy worker task failed");
            return Err(CacheError::Internal(format!("tidy worker failed: {e}")));
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        if self.running.lock().is_some() {
            self.control.paused.store(true, Ordering::Release);
            self.control
                .state
                .send_if_modified(|state| match state {
                    TidyState::Idle => {
                        *state = TidyState::Paused;
                        true
                    }
                    _ => false,
                });
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.control.paused.store(false, Ordering::Release);
        self.control.state.send_if_modified(|state| match state {
            TidyState::Paused => {
                *state = TidyState::Idle;
                true
            }
            _ => false,
        });
        Ok(())
    }
}

impl<T> std::fmt::Debug for TidyWorker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TidyWorker")
            .field("interval", &self.interval)
            .field("state", &*self.control.state.borrow())
            .finish()
    }
}
