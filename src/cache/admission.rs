//! Admission Control Module
//!
//! Enforces hard count and size limits before an insert completes. A writer
//! that would break a hard limit is held back while victims are evicted,
//! and fails only when nothing evictable is left.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::cache::disposal::CacheItem;
use crate::cache::entry::CacheEntry;
use crate::cache::events::RemovalCause;
use crate::cache::policy::{EvictionPolicyEngine, Reduction};
use crate::cache::store::CacheStore;
use crate::cancel::CancellationToken;
use crate::error::{CacheError, Result};

// == Hard Limits ==
/// Zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardLimits {
    pub count: usize,
    pub size: i64,
    pub max_item_size: i64,
}

impl HardLimits {
    pub fn is_active(&self) -> bool {
        self.count > 0 || self.size > 0
    }
}

// == Admission Controller ==
pub struct AdmissionController<T> {
    store: Arc<CacheStore<T>>,
    engine: Arc<EvictionPolicyEngine<T>>,
    limits: HardLimits,
    /// Serializes room-making and insertion while a hard limit is active
    gate: Mutex<()>,
}

impl<T: CacheItem> AdmissionController<T> {
    pub fn new(
        store: Arc<CacheStore<T>>,
        engine: Arc<EvictionPolicyEngine<T>>,
        limits: HardLimits,
    ) -> Self {
        Self {
            store,
            engine,
            limits,
            gate: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> HardLimits {
        self.limits
    }

    // == Check Item ==
    /// Rejects items that could never fit.
    pub fn check_item(&self, size: i64) -> Result<()> {
        if size < 0 {
            return Err(CacheError::InvalidRequest(format!(
                "Entry size must not be negative, got {size}"
            )));
        }
        if self.limits.max_item_size > 0 && size > self.limits.max_item_size {
            return Err(CacheError::ItemTooLarge {
                size,
                limit: self.limits.max_item_size,
            });
        }
        if self.limits.size > 0 && size > self.limits.size {
            return Err(CacheError::ItemTooLarge {
                size,
                limit: self.limits.size,
            });
        }
        Ok(())
    }

    // == Admit ==
    /// Makes room for an entry of `candidate_size` under `key`, then runs
    /// `insert` while still holding the admission gate.
    ///
    /// When the key is resident and `replace` is false no room is needed:
    /// `insert` is expected to hand back the resident entry. Victims are
    /// retired after the gate is released, so removal callbacks and item
    /// disposal may re-enter the cache. `insert` itself must not fire
    /// callbacks.
    pub fn admit<R, F>(
        &self,
        key: &str,
        candidate_size: i64,
        replace: bool,
        cancel: &CancellationToken,
        insert: F,
    ) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        self.check_item(candidate_size)?;
        if !self.limits.is_active() {
            return Ok(insert());
        }

        let mut evicted = Vec::new();
        let admitted = {
            let _gate = self.gate.lock();
            let resident = self.store.peek(key).map(|e| e.size());
            let room = if resident.is_none() || replace {
                self.ensure_room(key, candidate_size, resident, cancel, &mut evicted)
            } else {
                Ok(())
            };
            room.map(|()| insert())
        };

        self.engine.retire_evicted(evicted, RemovalCause::Capacity);
        admitted
    }

    // == Ensure Room ==
    /// Evicts until an entry of `candidate_size` fits under the hard limits.
    ///
    /// `replacing` is the size of the resident entry the insert overwrites.
    /// Victims are moved to `evicted` and still need retiring.
    pub(crate) fn ensure_room(
        &self,
        key: &str,
        candidate_size: i64,
        replacing: Option<i64>,
        cancel: &CancellationToken,
        evicted: &mut Vec<Arc<CacheEntry<T>>>,
    ) -> Result<()> {
        if self.limits.size > 0 {
            // Re-checked after each pass: the resident may be evicted, and then
            // its size no longer counts as freed
            loop {
                let freed = match replacing {
                    Some(_) => self.store.peek(key).map(|e| e.size()).unwrap_or(0),
                    None => 0,
                };
                if self.store.total_size() - freed + candidate_size <= self.limits.size {
                    break;
                }
                let target = self.limits.size - candidate_size + freed;
                let reduction = self.engine.evict_size(target, cancel, evicted);
                self.check_reduction(reduction, "size")?;
            }
        }

        if self.limits.count > 0 {
            // The resident entry may itself have been evicted above
            let replaces_resident = replacing.is_some() && self.store.contains_key(key);
            if !replaces_resident && self.store.count() >= self.limits.count {
                let reduction = self.engine.evict_count(self.limits.count - 1, cancel, evicted);
                self.check_reduction(reduction, "count")?;
            }
        }
        Ok(())
    }

    fn check_reduction(&self, reduction: Reduction, limit: &str) -> Result<()> {
        if reduction.cancelled {
            return Err(CacheError::Cancelled);
        }
        if !reduction.satisfied {
            warn!(
                limit,
                count = self.store.count(),
                size = self.store.total_size(),
                "Hard limit cannot be satisfied; no evictable entries left"
            );
            return Err(CacheError::Capacity(format!(
                "hard {limit} limit reached and no evictable entry is left"
            )));
        }
        Ok(())
    }
}

impl<T> fmt::Debug for AdmissionController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limits", &self.limits)
            .finish()
    }
}
