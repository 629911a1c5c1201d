//! In-Memory Cache Module
//!
//! The public cache facade: add/get/remove/clear on top of the store, with
//! hard limits enforced by admission control and removed items released
//! through the disposal coordinator.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::admission::AdmissionController;
use crate::cache::disposal::{CacheItem, DisposalCoordinator, DisposalErrorHandler};
use crate::cache::entry::{CacheEntry, EntryOptions};
use crate::cache::events::{
    CacheEntryEvent, CacheEvents, EntryEvent, RemovalCause, StoreChange, Subscription,
};
use crate::cache::policy::EvictionPolicyEngine;
use crate::cache::stats::{CacheStats, StatsCounter};
use crate::cache::store::CacheStore;
use crate::cache::striped::Striped;
use crate::cancel::CancellationToken;
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};

// == Add Outcome ==
/// What `add` did with the new item.
#[derive(Debug)]
pub enum AddOutcome<T> {
    /// The new entry is resident; `replaced` is the entry it overwrote
    Inserted {
        entry: Arc<CacheEntry<T>>,
        replaced: Option<Arc<CacheEntry<T>>>,
    },
    /// The key was taken and overwriting was not requested
    Existing(Arc<CacheEntry<T>>),
}

impl<T> AddOutcome<T> {
    /// The entry now resident under the key.
    pub fn entry(&self) -> &Arc<CacheEntry<T>> {
        match self {
            AddOutcome::Inserted { entry, .. } => entry,
            AddOutcome::Existing(entry) => entry,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, AddOutcome::Inserted { .. })
    }
}

pub(crate) struct Inner<T> {
    pub(crate) options: CacheOptions,
    pub(crate) store: Arc<CacheStore<T>>,
    pub(crate) engine: Arc<EvictionPolicyEngine<T>>,
    pub(crate) admission: AdmissionController<T>,
    pub(crate) disposal: Arc<DisposalCoordinator>,
    pub(crate) stats: Arc<StatsCounter>,
    pub(crate) events: Arc<CacheEvents<T>>,
    pub(crate) sync_stripes: Striped<parking_lot::Mutex<()>>,
    pub(crate) async_stripes: Striped<tokio::sync::Mutex<()>>,
    pub(crate) disposed: AtomicBool,
    /// Cancelled on dispose; background workers watch it
    pub(crate) shutdown: CancellationToken,
}

// == In-Memory Cache ==
/// A bounded, concurrent in-memory cache.
///
/// Cloning is cheap and every clone shares the same entries.
///
/// # Example
/// ```
/// use tidy_cache::{CacheOptions, InMemoryCache};
///
/// let cache: InMemoryCache<String> = InMemoryCache::new(CacheOptions::default()).unwrap();
/// cache.add("greeting", "hello".to_string(), None).unwrap();
/// assert_eq!(cache.get("greeting").unwrap().unwrap().as_str(), "hello");
/// ```
pub struct InMemoryCache<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> Clone for InMemoryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CacheItem> InMemoryCache<T> {
    // == Constructor ==
    /// Creates a cache on the system clock. See [`CacheBuilder`](crate::cache::CacheBuilder)
    /// for a custom clock or memory probe.
    pub fn new(options: CacheOptions) -> Result<Self> {
        crate::cache::CacheBuilder::new(options).build()
    }

    pub(crate) fn from_parts(
        options: CacheOptions,
        store: Arc<CacheStore<T>>,
        engine: Arc<EvictionPolicyEngine<T>>,
        disposal: Arc<DisposalCoordinator>,
        stats: Arc<StatsCounter>,
        events: Arc<CacheEvents<T>>,
    ) -> Self {
        let admission =
            AdmissionController::new(store.clone(), engine.clone(), options.hard_limits());
        let stripes = options.stripe_count();
        Self {
            inner: Arc::new(Inner {
                sync_stripes: Striped::new(stripes, || parking_lot::Mutex::new(())),
                async_stripes: Striped::new(stripes, || tokio::sync::Mutex::new(())),
                options,
                store,
                engine,
                admission,
                disposal,
                stats,
                events,
                disposed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // == Add ==
    /// Stores `item` under `key`, overwriting any resident entry.
    pub fn add(
        &self,
        key: impl Into<String>,
        item: T,
        options: Option<&EntryOptions>,
    ) -> Result<AddOutcome<T>> {
        self.add_with(key, item, options, true, false, &CancellationToken::new())
    }

    /// Full form of [`add`](Self::add).
    ///
    /// With `remove_existing` false a resident, unexpired entry is kept and
    /// returned as [`AddOutcome::Existing`]; `dispose_unused` then releases
    /// the rejected item. Blocks while admission evicts victims to satisfy a
    /// hard limit.
    pub fn add_with(
        &self,
        key: impl Into<String>,
        item: T,
        options: Option<&EntryOptions>,
        remove_existing: bool,
        dispose_unused: bool,
        cancel: &CancellationToken,
    ) -> Result<AddOutcome<T>> {
        self.ensure_live()?;
        let key = key.into();
        let defaults = &self.inner.options.default_entry;
        let options = match options {
            Some(options) => options.or_defaults(defaults),
            None => defaults.clone(),
        };
        let item = Arc::new(item);
        let size = item.size().or(options.size).unwrap_or(1);
        let store = &self.inner.store;

        if !remove_existing {
            self.evict_if_stale(&key);
        }

        let entry = CacheEntry::new(key.clone(), Arc::clone(&item), size, &options, store.now_ms());
        let admitted = self
            .inner
            .admission
            .admit(&key, size, remove_existing, cancel, || {
                if remove_existing {
                    let (entry, replaced) = store.insert_unannounced(entry);
                    AddOutcome::Inserted { entry, replaced }
                } else {
                    match store.insert_if_absent_unannounced(entry) {
                        Ok(entry) => AddOutcome::Inserted {
                            entry,
                            replaced: None,
                        },
                        Err(existing) => AddOutcome::Existing(existing),
                    }
                }
            });

        let outcome = match admitted {
            Ok(outcome) => outcome,
            Err(err) => {
                if dispose_unused {
                    self.inner.disposal.release(&key, item.as_ref());
                }
                return Err(err);
            }
        };

        match &outcome {
            AddOutcome::Inserted { entry, replaced } => {
                let key = entry.key().to_string();
                store.announce(&match replaced {
                    Some(_) => StoreChange::Replaced { key },
                    None => StoreChange::Inserted { key },
                });
                if let Some(old) = replaced {
                    self.inner.engine.retire(
                        old,
                        RemovalCause::Replaced,
                        self.inner.options.try_dispose_items_always,
                    );
                }
                self.inner.events.added(entry);
            }
            AddOutcome::Existing(_) => {
                if dispose_unused {
                    self.inner.disposal.release(&key, item.as_ref());
                }
            }
        }
        Ok(outcome)
    }

    /// Async form of [`add_with`](Self::add_with); room-making runs on the
    /// blocking pool so eviction never stalls the runtime.
    pub async fn add_async(
        &self,
        key: impl Into<String>,
        item: T,
        options: Option<EntryOptions>,
        remove_existing: bool,
        dispose_unused: bool,
        cancel: &CancellationToken,
    ) -> Result<AddOutcome<T>> {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let cache = self.clone();
        let key = key.into();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            cache.add_with(key, item, options.as_ref(), remove_existing, dispose_unused, &cancel)
        })
        .await
        .map_err(|e| CacheError::Internal(format!("add task failed: {e}")))?
    }

    // == Get ==
    /// Returns the item for `key` if it is resident and unexpired.
    ///
    /// Expired entries, and entries whose item disposed itself while
    /// observed, are removed as a side effect and reported as absent.
    pub fn get(&self, key: &str) -> Result<Option<Arc<T>>> {
        Ok(self.get_entry(key)?.map(|e| Arc::clone(e.item())))
    }

    /// Like [`get`](Self::get) but returns the entry with its metadata.
    pub fn get_entry(&self, key: &str) -> Result<Option<Arc<CacheEntry<T>>>> {
        self.ensure_live()?;
        let found = self.lookup(key);
        match found {
            Some(_) => self.inner.stats.record_hit(),
            None => self.inner.stats.record_miss(),
        }
        Ok(found)
    }

    // == Get Or Add ==
    /// Returns the resident item or builds one with `factory` and adds it.
    ///
    /// Concurrent misses for the same key run `factory` once; the others wait
    /// and receive the stored item. `factory` must not call back into this
    /// cache's get-or-add for a key that may share its lock stripe.
    ///
    /// The lock stripes are not shared with
    /// [`get_or_add_with_async`](Self::get_or_add_with_async): a concurrent
    /// sync and async miss on the same key may each run their factory. The
    /// first to insert wins and the other item is disposed.
    pub fn get_or_add_with<F>(
        &self,
        key: &str,
        options: Option<&EntryOptions>,
        factory: F,
    ) -> Result<Arc<T>>
    where
        F: FnOnce() -> T,
    {
        if let Some(item) = self.get(key)? {
            return Ok(item);
        }

        let _stripe = self.inner.sync_stripes.for_key(key).lock();
        if let Some(entry) = self.lookup(key) {
            return Ok(Arc::clone(entry.item()));
        }
        let outcome = self.add_with(
            key,
            factory(),
            options,
            false,
            true,
            &CancellationToken::new(),
        )?;
        Ok(Arc::clone(outcome.entry().item()))
    }

    /// Async form of [`get_or_add_with`](Self::get_or_add_with).
    ///
    /// Cancellation while waiting for the stripe or the factory leaves the
    /// key untouched. Single-flight only holds among async callers; a
    /// concurrent [`get_or_add_with`](Self::get_or_add_with) on the same key
    /// may run its own factory, and the item that loses the insert is
    /// disposed.
    pub async fn get_or_add_with_async<F, Fut>(
        &self,
        key: &str,
        options: Option<&EntryOptions>,
        cancel: &CancellationToken,
        factory: F,
    ) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(item) = self.get(key)? {
            return Ok(item);
        }

        let _stripe = tokio::select! {
            guard = self.inner.async_stripes.for_key(key).lock() => guard,
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
        };
        if let Some(entry) = self.lookup(key) {
            return Ok(Arc::clone(entry.item()));
        }

        let item = tokio::select! {
            item = factory() => item,
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
        };
        let outcome = self.add_with(key, item, options, false, true, cancel)?;
        Ok(Arc::clone(outcome.entry().item()))
    }

    // == Remove ==
    /// Removes and returns the entry for `key`; `None` if absent.
    pub fn remove(&self, key: &str) -> Result<Option<Arc<CacheEntry<T>>>> {
        self.ensure_live()?;
        let removed = self.inner.store.remove(key);
        if let Some(entry) = &removed {
            self.inner.engine.retire(
                entry,
                RemovalCause::Explicit,
                self.inner.options.try_dispose_items_always,
            );
        }
        Ok(removed)
    }

    /// Removes the entry for `key` and hands back its item.
    pub fn try_remove(&self, key: &str) -> Result<Option<Arc<T>>> {
        Ok(self.remove(key)?.map(|e| Arc::clone(e.item())))
    }

    // == Clear ==
    /// Drains the cache, returning every removed entry.
    pub fn clear(&self, dispose_items: bool) -> Result<Vec<Arc<CacheEntry<T>>>> {
        self.ensure_live()?;
        let release = dispose_items || self.inner.options.try_dispose_items_always;
        let drained = self.inner.store.clear();
        for entry in &drained {
            self.inner.engine.retire(entry, RemovalCause::Cleared, release);
        }
        debug!(count = drained.len(), release, "Cache cleared");
        Ok(drained)
    }

    pub async fn clear_async(
        &self,
        dispose_items: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<CacheEntry<T>>>> {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.clear(dispose_items))
            .await
            .map_err(|e| CacheError::Internal(format!("clear task failed: {e}")))?
    }

    // == Dispose ==
    /// Stops background work and drains the cache. Every later call that
    /// reads or mutates entries fails with [`CacheError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();

        let release = self.inner.options.try_dispose_items_always;
        let drained = self.inner.store.clear();
        for entry in &drained {
            self.inner.engine.retire(entry, RemovalCause::Cleared, release);
        }
        info!(released = drained.len(), "Cache disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    // == Properties ==
    pub fn count(&self) -> usize {
        self.inner.store.count()
    }

    /// Sum of resident entry sizes.
    pub fn size(&self) -> i64 {
        self.inner.store.total_size()
    }

    /// Resident keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.store.keys()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.store.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.inner
            .stats
            .snapshot(self.inner.store.count(), self.inner.store.total_size())
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// The reductions used by admission and the tidy worker.
    pub fn policy(&self) -> &EvictionPolicyEngine<T> {
        &self.inner.engine
    }

    pub fn store(&self) -> &CacheStore<T> {
        &self.inner.store
    }

    pub fn set_disposal_error_handler(&self, handler: DisposalErrorHandler) {
        self.inner.disposal.set_error_handler(handler);
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    // == Events ==
    pub fn on_entry_added<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EntryEvent) + Send + Sync + 'static,
    {
        self.inner.events.entry_added.subscribe(callback)
    }

    pub fn on_entry_removed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EntryEvent) + Send + Sync + 'static,
    {
        self.inner.events.entry_removed.subscribe(callback)
    }

    pub fn on_cache_entry_added<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheEntryEvent<T>) + Send + Sync + 'static,
    {
        self.inner.events.cache_entry_added.subscribe(callback)
    }

    pub fn on_cache_entry_removed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheEntryEvent<T>) + Send + Sync + 'static,
    {
        self.inner.events.cache_entry_removed.subscribe(callback)
    }

    /// Low-level structural change feed from the store.
    pub fn on_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.inner.store.on_changed(callback)
    }

    // == Internals ==
    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }

    /// Resident, live entry for `key`, touched. No stats recorded.
    fn lookup(&self, key: &str) -> Option<Arc<CacheEntry<T>>> {
        if self.evict_if_stale(key) {
            return None;
        }
        self.inner.store.try_get(key)
    }

    /// Removes the entry for `key` if it expired or its observed item
    /// disposed itself. Returns true when the key is no longer live.
    ///
    /// Runs before any touch so a sliding deadline is judged on the previous
    /// access.
    fn evict_if_stale(&self, key: &str) -> bool {
        let Some(entry) = self.inner.store.peek(key) else {
            return true;
        };
        let now = self.inner.store.now_ms();

        let cause = if entry.is_expired(now) {
            RemovalCause::Expired
        } else if entry.observes_disposal() && entry.item().disposal().is_disposed() {
            RemovalCause::Disposed
        } else {
            return false;
        };

        if self.inner.store.remove_if_same(&entry) {
            self.inner
                .engine
                .retire(&entry, cause, cause == RemovalCause::Expired);
        }
        true
    }
}

impl<T> fmt::Debug for InMemoryCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("store", &self.inner.store)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}
