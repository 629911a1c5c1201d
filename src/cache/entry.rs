//! Cache Entry Module
//!
//! Defines the per-key record, its expiry policy and its eviction class.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::serde_millis;

// == Eviction Class ==
/// Whether reductions may pick an entry as a victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionClass {
    #[default]
    Evictable,
    /// Excluded from every reduction; only explicit removal, expiry or
    /// observed disposal take it out.
    Pinned,
}

// == Entry Options ==
/// Per-entry settings. Unset fields fall back to the cache defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryOptions {
    /// Expiry timeout, `None` = never expires by timeout
    #[serde(with = "serde_millis::option")]
    pub timeout: Option<Duration>,
    /// Whether the timeout restarts on every successful read
    pub sliding: Option<bool>,
    /// Fixed deadline (Unix milliseconds), independent of access
    pub absolute_deadline_ms: Option<u64>,
    /// Size override used when the item does not report its own size
    pub size: Option<i64>,
    pub class: EvictionClass,
    /// Remove the entry when the item disposes itself outside the cache
    pub observe_disposal: bool,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_sliding(mut self, sliding: bool) -> Self {
        self.sliding = Some(sliding);
        self
    }

    pub fn with_absolute_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.absolute_deadline_ms = Some(deadline_ms);
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.class = EvictionClass::Pinned;
        self
    }

    pub fn with_observe_disposal(mut self, observe: bool) -> Self {
        self.observe_disposal = observe;
        self
    }

    /// Fills every unset field from `defaults`.
    ///
    /// The eviction class is always taken from `self`; disposal is observed
    /// when either side asks for it.
    pub fn or_defaults(&self, defaults: &EntryOptions) -> EntryOptions {
        EntryOptions {
            timeout: self.timeout.or(defaults.timeout),
            sliding: self.sliding.or(defaults.sliding),
            absolute_deadline_ms: self.absolute_deadline_ms.or(defaults.absolute_deadline_ms),
            size: self.size.or(defaults.size),
            class: self.class,
            observe_disposal: self.observe_disposal || defaults.observe_disposal,
        }
    }

    pub(crate) fn expiry(&self) -> Expiry {
        Expiry {
            timeout: self.timeout,
            sliding: self.sliding.unwrap_or(false),
            absolute_deadline_ms: self.absolute_deadline_ms,
        }
    }
}

// == Expiry ==
/// Expiry policy captured when the entry is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Expiry {
    pub timeout: Option<Duration>,
    pub sliding: bool,
    pub absolute_deadline_ms: Option<u64>,
}

impl Expiry {
    /// Earliest of the absolute deadline and the timeout deadline.
    ///
    /// The timeout counts from the last access for sliding entries and from
    /// creation otherwise.
    pub fn deadline_ms(&self, created_ms: u64, last_accessed_ms: u64) -> Option<u64> {
        let anchor = if self.sliding {
            last_accessed_ms
        } else {
            created_ms
        };
        let by_timeout = self
            .timeout
            .map(|t| anchor.saturating_add(t.as_millis() as u64));

        match (by_timeout, self.absolute_deadline_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

// == Cache Entry ==
/// Represents a single cache entry with its item and metadata.
#[derive(Debug)]
pub struct CacheEntry<T> {
    key: String,
    item: Arc<T>,
    size: i64,
    created_ms: u64,
    last_accessed_ms: AtomicU64,
    expiry: Expiry,
    class: EvictionClass,
    observe_disposal: bool,
    /// Insertion order, assigned by the store
    seq: u64,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates an entry stamped with `now_ms` as both creation and last
    /// access time.
    pub fn new(
        key: impl Into<String>,
        item: Arc<T>,
        size: i64,
        options: &EntryOptions,
        now_ms: u64,
    ) -> Self {
        Self {
            key: key.into(),
            item,
            size,
            created_ms: now_ms,
            last_accessed_ms: AtomicU64::new(now_ms),
            expiry: options.expiry(),
            class: options.class,
            observe_disposal: options.observe_disposal,
            seq: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn item(&self) -> &Arc<T> {
        &self.item
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    pub fn last_accessed_ms(&self) -> u64 {
        self.last_accessed_ms.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.created_ms)
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.last_accessed_ms())
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn class(&self) -> EvictionClass {
        self.class
    }

    pub fn is_pinned(&self) -> bool {
        self.class == EvictionClass::Pinned
    }

    pub fn observes_disposal(&self) -> bool {
        self.observe_disposal
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    // == Touch ==
    /// Records a successful read. Never moves the access time backwards.
    pub(crate) fn touch(&self, now_ms: u64) {
        self.last_accessed_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.expiry
            .deadline_ms(self.created_ms, self.last_accessed_ms())
    }

    // == Is Expired ==
    /// An entry is expired once `now_ms` reaches its deadline.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.deadline_ms() {
            Some(deadline) => now_ms >= deadline,
            None => false,
        }
    }

    // == Time To Live ==
    /// Remaining lifetime in milliseconds, `None` if the entry never expires.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.deadline_ms()
            .map(|deadline| deadline.saturating_sub(now_ms))
    }

    /// Age as seen by age-based reduction.
    ///
    /// Sliding entries count from their last access, so a reader that keeps
    /// touching them keeps them young.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        let anchor = if self.expiry.sliding {
            self.last_accessed_ms()
        } else {
            self.created_ms
        };
        now_ms.saturating_sub(anchor)
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_accessed_ms())
    }
}

fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_default()
}
