//! Eviction Policy Module
//!
//! Victim selection and the reductions that enforce count, size, age, idle
//! and memory limits. Every reduction is a sequence of single atomic
//! removals, so a concurrent remove or a cancellation never leaves the store
//! half-updated.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::disposal::{CacheItem, DisposalCoordinator};
use crate::cache::entry::CacheEntry;
use crate::cache::events::{CacheEvents, RemovalCause, StoreChange};
use crate::cache::stats::StatsCounter;
use crate::cache::store::CacheStore;
use crate::cancel::CancellationToken;

// == Strategy ==
/// Order in which evictable entries are chosen as victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Oldest creation time first
    #[default]
    Age,
    /// Least recently accessed first
    Idle,
    /// Largest size first
    Largest,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "age" => Ok(Strategy::Age),
            "idle" | "lru" => Ok(Strategy::Idle),
            "largest" | "size" => Ok(Strategy::Largest),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

// == Memory Probe ==
/// Reports the memory usage `reduce_memory` tries to bring under target.
pub trait MemoryProbe: Send + Sync {
    fn used_bytes(&self) -> u64;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn used_bytes(&self) -> u64 {
        self()
    }
}

// == Reduction ==
/// Outcome of one reduction call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reduction {
    pub removed: usize,
    /// Whether the target holds once the call returns
    pub satisfied: bool,
    pub cancelled: bool,
}

impl Reduction {
    fn done(removed: usize, satisfied: bool) -> Self {
        Self {
            removed,
            satisfied,
            cancelled: false,
        }
    }

    fn cancelled(removed: usize) -> Self {
        Self {
            removed,
            satisfied: false,
            cancelled: true,
        }
    }
}

// == Eviction Policy Engine ==
pub struct EvictionPolicyEngine<T> {
    store: Arc<CacheStore<T>>,
    disposal: Arc<DisposalCoordinator>,
    stats: Arc<StatsCounter>,
    events: Arc<CacheEvents<T>>,
    strategy: Strategy,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
}

impl<T: CacheItem> EvictionPolicyEngine<T> {
    pub fn new(
        store: Arc<CacheStore<T>>,
        disposal: Arc<DisposalCoordinator>,
        stats: Arc<StatsCounter>,
        events: Arc<CacheEvents<T>>,
        strategy: Strategy,
    ) -> Self {
        Self {
            store,
            disposal,
            stats,
            events,
            strategy,
            memory_probe: None,
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn has_memory_probe(&self) -> bool {
        self.memory_probe.is_some()
    }

    // == Victim Selection ==
    /// Evictable entries in the order the strategy would remove them.
    ///
    /// Ties are broken by insertion order.
    pub fn select_victims(&self) -> Vec<Arc<CacheEntry<T>>> {
        let mut candidates: Vec<Arc<CacheEntry<T>>> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|e| !e.is_pinned())
            .collect();

        // snapshot() is already in insertion order and the sorts are stable
        match self.strategy {
            Strategy::Age => candidates.sort_by_key(|e| e.created_ms()),
            Strategy::Idle => candidates.sort_by_cached_key(|e| e.last_accessed_ms()),
            Strategy::Largest => candidates.sort_by_key(|e| Reverse(e.size())),
        }
        candidates
    }

    // == Reduce Count ==
    /// Removes victims until at most `target` entries remain.
    pub fn reduce_count(&self, target: usize, cancel: &CancellationToken) -> Reduction {
        let mut evicted = Vec::new();
        let reduction = self.evict_count(target, cancel, &mut evicted);
        self.retire_evicted(evicted, RemovalCause::Capacity);
        reduction
    }

    /// Like [`reduce_count`](Self::reduce_count), but victims only leave the
    /// store. They are pushed onto `evicted` for
    /// [`retire_evicted`](Self::retire_evicted) once the caller's locks are
    /// released.
    pub(crate) fn evict_count(
        &self,
        target: usize,
        cancel: &CancellationToken,
        evicted: &mut Vec<Arc<CacheEntry<T>>>,
    ) -> Reduction {
        self.reduce_until(
            || self.store.count() <= target,
            RemovalCause::Capacity,
            cancel,
            evicted,
        )
    }

    // == Reduce Size ==
    /// Removes victims until the total size is at most `target`.
    pub fn reduce_size(&self, target: i64, cancel: &CancellationToken) -> Reduction {
        let mut evicted = Vec::new();
        let reduction = self.evict_size(target, cancel, &mut evicted);
        self.retire_evicted(evicted, RemovalCause::Capacity);
        reduction
    }

    pub(crate) fn evict_size(
        &self,
        target: i64,
        cancel: &CancellationToken,
        evicted: &mut Vec<Arc<CacheEntry<T>>>,
    ) -> Reduction {
        self.reduce_until(
            || self.store.total_size() <= target,
            RemovalCause::Capacity,
            cancel,
            evicted,
        )
    }

    // == Reduce Memory ==
    /// Removes victims until the memory probe reports at most `target_bytes`.
    pub fn reduce_memory(&self, target_bytes: u64, cancel: &CancellationToken) -> Reduction {
        let Some(probe) = self.memory_probe.clone() else {
            warn!("reduce_memory called without a memory probe; nothing removed");
            return Reduction::done(0, false);
        };
        let mut evicted = Vec::new();
        let reduction = self.reduce_until(
            || probe.used_bytes() <= target_bytes,
            RemovalCause::Memory,
            cancel,
            &mut evicted,
        );
        self.retire_evicted(evicted, RemovalCause::Memory);
        reduction
    }

    // == Reduce Old ==
    /// Removes every evictable entry older than `max_age`.
    pub fn reduce_old(&self, max_age: Duration, cancel: &CancellationToken) -> Reduction {
        let max_age_ms = max_age.as_millis() as u64;
        self.sweep(
            |e, now| !e.is_pinned() && e.age_ms(now) > max_age_ms,
            RemovalCause::Aged,
            true,
            cancel,
        )
    }

    // == Reduce Unpopular ==
    /// Removes every evictable entry not read within `max_idle`.
    pub fn reduce_unpopular(&self, max_idle: Duration, cancel: &CancellationToken) -> Reduction {
        let max_idle_ms = max_idle.as_millis() as u64;
        self.sweep(
            |e, now| !e.is_pinned() && e.idle_ms(now) > max_idle_ms,
            RemovalCause::Idle,
            true,
            cancel,
        )
    }

    // == Remove Expired ==
    /// Removes every entry whose deadline has passed, pinned or not.
    pub fn remove_expired(&self, cancel: &CancellationToken) -> Reduction {
        self.sweep(|e, now| e.is_expired(now), RemovalCause::Expired, true, cancel)
    }

    // == Remove Disposed ==
    /// Removes entries whose item disposed itself outside the cache.
    pub fn remove_disposed(&self, cancel: &CancellationToken) -> Reduction {
        self.sweep(
            |e, _| e.observes_disposal() && e.item().disposal().is_disposed(),
            RemovalCause::Disposed,
            false,
            cancel,
        )
    }

    // == Retire ==
    /// Bookkeeping for an entry that has just left the store.
    pub(crate) fn retire(&self, entry: &Arc<CacheEntry<T>>, cause: RemovalCause, release: bool) {
        self.stats.record_removal(cause);
        if release {
            self.disposal.release(entry.key(), entry.item().as_ref());
        }
        self.events.removed(entry, cause);
    }

    /// Announces and retires victims taken out by `evict_count` or
    /// `evict_size`. Must run with no cache lock held: it fires callbacks and
    /// disposes items.
    pub(crate) fn retire_evicted(&self, evicted: Vec<Arc<CacheEntry<T>>>, cause: RemovalCause) {
        for entry in &evicted {
            self.store.announce(&StoreChange::Removed {
                key: entry.key().to_string(),
            });
            self.retire(entry, cause, true);
        }
    }

    fn reduce_until<F>(
        &self,
        satisfied: F,
        cause: RemovalCause,
        cancel: &CancellationToken,
        evicted: &mut Vec<Arc<CacheEntry<T>>>,
    ) -> Reduction
    where
        F: Fn() -> bool,
    {
        let mut removed = 0;
        while !satisfied() {
            let victims = self.select_victims();
            let mut progressed = false;

            for victim in victims {
                if satisfied() {
                    break;
                }
                if cancel.is_cancelled() {
                    return Reduction::cancelled(removed);
                }
                // Concurrently removed or replaced victims are skipped
                if self.store.remove_if_same_unannounced(&victim) {
                    evicted.push(victim);
                    removed += 1;
                    progressed = true;
                }
            }

            if !progressed {
                break;
            }
        }

        let satisfied = satisfied();
        if removed > 0 {
            debug!(removed, ?cause, satisfied, "Reduction finished");
        }
        Reduction::done(removed, satisfied)
    }

    fn sweep<F>(&self, matches: F, cause: RemovalCause, release: bool, cancel: &CancellationToken) -> Reduction
    where
        F: Fn(&CacheEntry<T>, u64) -> bool,
    {
        let now = self.store.now_ms();
        let mut removed = 0;

        for entry in self.store.snapshot() {
            if cancel.is_cancelled() {
                return Reduction::cancelled(removed);
            }
            if matches(&entry, now) && self.store.remove_if_same(&entry) {
                self.retire(&entry, cause, release);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, ?cause, "Sweep finished");
        }
        Reduction::done(removed, true)
    }
}

impl<T> fmt::Debug for EvictionPolicyEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionPolicyEngine")
            .field("strategy", &self.strategy)
            .field("memory_probe", &self.memory_probe.is_some())
            .finish()
    }
}
