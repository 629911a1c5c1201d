//! Cache Builder
//!
//! Wires the store, policy engine, disposal coordinator and admission
//! control into an [`InMemoryCache`].

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::disposal::{CacheItem, DisposalCoordinator};
use crate::cache::events::CacheEvents;
use crate::cache::in_memory::InMemoryCache;
use crate::cache::policy::{EvictionPolicyEngine, MemoryProbe};
use crate::cache::stats::StatsCounter;
use crate::cache::store::CacheStore;
use crate::config::CacheOptions;
use crate::error::Result;

/// Builder for [`InMemoryCache`] when the defaults are not enough.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use tidy_cache::{CacheBuilder, CacheOptions, InMemoryCache, ManualClock};
///
/// let clock = Arc::new(ManualClock::new(0));
/// let cache: InMemoryCache<String> = CacheBuilder::new(CacheOptions::default())
///     .clock(clock)
///     .build()
///     .unwrap();
/// assert_eq!(cache.count(), 0);
/// ```
pub struct CacheBuilder<T> {
    options: CacheOptions,
    clock: Arc<dyn Clock>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    initial_capacity: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T: CacheItem> CacheBuilder<T> {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            options,
            clock: Arc::new(SystemClock),
            memory_probe: None,
            initial_capacity: 0,
            _item: PhantomData,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables `reduce_memory` and the tidy worker's memory step.
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Validates the options and builds the cache.
    pub fn build(self) -> Result<InMemoryCache<T>> {
        self.options.validate()?;

        let store = Arc::new(CacheStore::with_capacity(self.initial_capacity, self.clock));
        let stats = Arc::new(StatsCounter::new());
        let disposal = Arc::new(DisposalCoordinator::new(stats.clone()));
        let events = Arc::new(CacheEvents::new());

        let mut engine = EvictionPolicyEngine::new(
            store.clone(),
            disposal.clone(),
            stats.clone(),
            events.clone(),
            self.options.default_strategy,
        );
        if let Some(probe) = self.memory_probe {
            engine = engine.with_memory_probe(probe);
        }

        debug!(
            strategy = ?self.options.default_strategy,
            hard_count_limit = self.options.hard_count_limit,
            hard_size_limit = self.options.hard_size_limit,
            "Building cache"
        );

        Ok(InMemoryCache::from_parts(
            self.options,
            store,
            Arc::new(engine),
            disposal,
            stats,
            events,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::error::CacheError;
    use std::time::Duration;

    #[test]
    fn test_build_rejects_invalid_options() {
        let options = CacheOptions {
            tidy_interval: Duration::ZERO,
            ..CacheOptions::default()
        };
        let result = CacheBuilder::<String>::new(options).build();
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[test]
    fn test_build_with_clock_and_probe() {
        let clock = Arc::new(ManualClock::new(42));
        let probe: Arc<dyn MemoryProbe> = Arc::new(|| 0u64);
        let cache = CacheBuilder::<String>::new(CacheOptions::default())
            .clock(clock)
            .memory_probe(probe)
            .initial_capacity(8)
            .build()
            .unwrap();

        assert!(cache.policy().has_memory_probe());
        let entry = cache.add("k", "v".to_string(), None).unwrap();
        assert_eq!(entry.entry().created_ms(), 42);
    }
}
