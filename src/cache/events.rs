//! Notification Module
//!
//! Observer registration for store changes and entry add/remove events.
//! Callbacks run on the thread that caused the change, after internal locks
//! have been released, so a callback may call back into the cache.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::entry::CacheEntry;

// == Removal Cause ==
/// The reason an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalCause {
    /// Removed through `remove` / `try_remove`
    Explicit,
    /// Overwritten by a newer entry for the same key
    Replaced,
    /// Deadline passed
    Expired,
    /// Chosen as a victim to satisfy a count or size limit
    Capacity,
    /// Older than the age limit
    Aged,
    /// Not read within the idle limit
    Idle,
    /// Evicted to bring process memory under target
    Memory,
    /// The item disposed itself outside the cache
    Disposed,
    /// Dropped by `clear`
    Cleared,
}

impl RemovalCause {
    /// Whether the removal was decided by the cache rather than the caller.
    pub fn is_eviction(&self) -> bool {
        matches!(
            self,
            RemovalCause::Capacity | RemovalCause::Aged | RemovalCause::Idle | RemovalCause::Memory
        )
    }
}

// == Store Change ==
/// Structural mutation reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted { key: String },
    Replaced { key: String },
    Removed { key: String },
    Cleared { count: usize },
}

// == Entry Events ==
/// Key-level notification for `on_entry_added` / `on_entry_removed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryEvent {
    pub key: String,
    /// `None` for additions
    pub cause: Option<RemovalCause>,
}

/// Entry-level notification for `on_cache_entry_added` /
/// `on_cache_entry_removed`.
#[derive(Debug)]
pub struct CacheEntryEvent<T> {
    pub entry: Arc<CacheEntry<T>>,
    pub cause: Option<RemovalCause>,
}

/// The four event streams a cache publishes.
pub struct CacheEvents<T> {
    pub entry_added: Subscribers<EntryEvent>,
    pub entry_removed: Subscribers<EntryEvent>,
    pub cache_entry_added: Subscribers<CacheEntryEvent<T>>,
    pub cache_entry_removed: Subscribers<CacheEntryEvent<T>>,
}

impl<T: 'static> CacheEvents<T> {
    pub fn new() -> Self {
        Self {
            entry_added: Subscribers::new(),
            entry_removed: Subscribers::new(),
            cache_entry_added: Subscribers::new(),
            cache_entry_removed: Subscribers::new(),
        }
    }

    pub fn added(&self, entry: &Arc<CacheEntry<T>>) {
        self.entry_added.notify(&EntryEvent {
            key: entry.key().to_string(),
            cause: None,
        });
        if !self.cache_entry_added.is_empty() {
            self.cache_entry_added.notify(&CacheEntryEvent {
                entry: Arc::clone(entry),
                cause: None,
            });
        }
    }

    pub fn removed(&self, entry: &Arc<CacheEntry<T>>, cause: RemovalCause) {
        self.entry_removed.notify(&EntryEvent {
            key: entry.key().to_string(),
            cause: Some(cause),
        });
        if !self.cache_entry_removed.is_empty() {
            self.cache_entry_removed.notify(&CacheEntryEvent {
                entry: Arc::clone(entry),
                cause: Some(cause),
            });
        }
    }
}

impl<T: 'static> Default for CacheEvents<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CacheEvents<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEvents").finish_non_exhaustive()
    }
}

// == Subscribers ==
type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(u64, Callback<E>)>>,
}

/// A list of callbacks interested in events of type `E`.
pub struct Subscribers<E> {
    registry: Arc<Registry<E>>,
}

impl<E: 'static> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                callbacks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers `callback`. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.callbacks.write().push((id, Arc::new(callback)));

        let weak: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.callbacks.write().retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    /// Invokes every callback with `event`.
    ///
    /// The callback list is copied first so callbacks may subscribe or
    /// unsubscribe without deadlocking.
    pub fn notify(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = {
            let guard = self.registry.callbacks.read();
            if guard.is_empty() {
                return;
            }
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in callbacks {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.registry.callbacks.read().len())
            .finish()
    }
}

// == Subscription ==
/// Handle returned by `subscribe`. Dropping it unregisters the callback.
#[must_use = "dropping a Subscription unregisters the callback; call `detach` to keep it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the callback registered for the lifetime of the publisher.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
