//! Cache Store Module
//!
//! Concurrent keyed map of entries with count/size accounting and change
//! notification.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::clock::Clock;
use crate::cache::entry::CacheEntry;
use crate::cache::events::{StoreChange, Subscribers, Subscription};

struct StoreInner<T> {
    entries: HashMap<String, Arc<CacheEntry<T>>>,
    total_size: i64,
    next_seq: u64,
}

// == Cache Store ==
/// Thread-safe entry map.
///
/// `count` and `total_size` are mirrored into atomics while the write lock is
/// held, so they never disagree with the map once a mutation has returned.
pub struct CacheStore<T> {
    inner: RwLock<StoreInner<T>>,
    count: AtomicUsize,
    total_size: AtomicI64,
    clock: Arc<dyn Clock>,
    changes: Subscribers<StoreChange>,
}

impl<T: Send + Sync + 'static> CacheStore<T> {
    // == Constructor ==
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(0, clock)
    }

    pub fn with_capacity(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                entries: HashMap::with_capacity(capacity),
                total_size: 0,
                next_seq: 0,
            }),
            count: AtomicUsize::new(0),
            total_size: AtomicI64::new(0),
            clock,
            changes: Subscribers::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // == Insert ==
    /// Stores `entry`, replacing any entry under the same key.
    ///
    /// Returns the stored entry and the one it replaced.
    pub fn insert(
        &self,
        entry: CacheEntry<T>,
    ) -> (Arc<CacheEntry<T>>, Option<Arc<CacheEntry<T>>>) {
        let (stored, old) = self.insert_unannounced(entry);
        self.announce(&match old {
            Some(_) => StoreChange::Replaced {
                key: stored.key().to_string(),
            },
            None => StoreChange::Inserted {
                key: stored.key().to_string(),
            },
        });
        (stored, old)
    }

    /// [`insert`](Self::insert) without the change notification. The caller
    /// owes an [`announce`](Self::announce) once its own locks are released.
    pub(crate) fn insert_unannounced(
        &self,
        mut entry: CacheEntry<T>,
    ) -> (Arc<CacheEntry<T>>, Option<Arc<CacheEntry<T>>>) {
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        entry.set_seq(inner.next_seq);

        let stored = Arc::new(entry);
        let old = inner
            .entries
            .insert(stored.key().to_string(), Arc::clone(&stored));

        inner.total_size += stored.size();
        if let Some(old) = &old {
            inner.total_size -= old.size();
        }
        self.publish_counters(&inner);
        (stored, old)
    }

    // == Insert If Absent ==
    /// Stores `entry` only when the key is free.
    ///
    /// On conflict the resident entry is returned as the error value.
    pub fn insert_if_absent(
        &self,
        entry: CacheEntry<T>,
    ) -> std::result::Result<Arc<CacheEntry<T>>, Arc<CacheEntry<T>>> {
        let stored = self.insert_if_absent_unannounced(entry)?;
        self.announce(&StoreChange::Inserted {
            key: stored.key().to_string(),
        });
        Ok(stored)
    }

    pub(crate) fn insert_if_absent_unannounced(
        &self,
        mut entry: CacheEntry<T>,
    ) -> std::result::Result<Arc<CacheEntry<T>>, Arc<CacheEntry<T>>> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.entries.get(entry.key()) {
            return Err(Arc::clone(existing));
        }
        inner.next_seq += 1;
        entry.set_seq(inner.next_seq);

        let stored = Arc::new(entry);
        inner
            .entries
            .insert(stored.key().to_string(), Arc::clone(&stored));
        inner.total_size += stored.size();
        self.publish_counters(&inner);
        Ok(stored)
    }

    // == Remove ==
    /// Removes and returns the entry for `key`, if any.
    pub fn remove(&self, key: &str) -> Option<Arc<CacheEntry<T>>> {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.entries.remove(key)?;
            inner.total_size -= removed.size();
            self.publish_counters(&inner);
            removed
        };

        self.changes.notify(&StoreChange::Removed {
            key: key.to_string(),
        });
        Some(removed)
    }

    // == Remove If Same ==
    /// Removes `entry` only if it is still the resident entry for its key.
    ///
    /// Returns false when the key was removed or replaced in the meantime.
    pub fn remove_if_same(&self, entry: &Arc<CacheEntry<T>>) -> bool {
        if !self.remove_if_same_unannounced(entry) {
            return false;
        }
        self.announce(&StoreChange::Removed {
            key: entry.key().to_string(),
        });
        true
    }

    pub(crate) fn remove_if_same_unannounced(&self, entry: &Arc<CacheEntry<T>>) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.get(entry.key()) {
            Some(current) if Arc::ptr_eq(current, entry) => {}
            _ => return false,
        }
        inner.entries.remove(entry.key());
        inner.total_size -= entry.size();
        self.publish_counters(&inner);
        true
    }

    // == Try Get ==
    /// Returns the entry for `key` and records the access.
    pub fn try_get(&self, key: &str) -> Option<Arc<CacheEntry<T>>> {
        let inner = self.inner.read();
        let entry = inner.entries.get(key)?;
        entry.touch(self.clock.now_ms());
        Some(Arc::clone(entry))
    }

    /// Returns the entry for `key` without recording an access.
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry<T>>> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    // == Clear ==
    /// Drains the store, returning the removed entries in insertion order.
    pub fn clear(&self) -> Vec<Arc<CacheEntry<T>>> {
        let mut drained: Vec<Arc<CacheEntry<T>>> = {
            let mut inner = self.inner.write();
            let drained = inner.entries.drain().map(|(_, e)| e).collect();
            inner.total_size = 0;
            self.publish_counters(&inner);
            drained
        };
        drained.sort_by_key(|e| e.seq());

        self.changes.notify(&StoreChange::Cleared {
            count: drained.len(),
        });
        drained
    }

    // == Snapshot ==
    /// Copies the current entries, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<CacheEntry<T>>> {
        let mut entries: Vec<Arc<CacheEntry<T>>> =
            self.inner.read().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.seq());
        entries
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|e| e.key().to_string())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn total_size(&self) -> i64 {
        self.total_size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    // == Change Notification ==
    /// Registers `callback` for every structural mutation.
    pub fn on_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.changes.subscribe(callback)
    }

    /// Publishes `change` to `on_changed` subscribers.
    pub(crate) fn announce(&self, change: &StoreChange) {
        self.changes.notify(change);
    }

    fn publish_counters(&self, inner: &StoreInner<T>) {
        self.count.store(inner.entries.len(), Ordering::Release);
        self.total_size.store(inner.total_size, Ordering::Release);
    }
}

impl<T> fmt::Debug for CacheStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("total_size", &self.total_size.load(Ordering::Relaxed))
            .finish()
    }
}
