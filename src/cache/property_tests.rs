//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the cache's correctness properties over random
//! operation sequences.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheBuilder, Clock, EntryOptions, InMemoryCache, ManualClock};
use crate::config::CacheOptions;

// == Strategies ==
/// Generates cache keys from a small alphabet so operations collide
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-h]{1,2}".prop_map(|s| s)
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{0,12}".prop_map(|s| s)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Add { key: String, value: String },
    Get { key: String },
    Remove { key: String },
    Advance { ms: u64 },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| CacheOp::Add { key, value }),
        2 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        1 => key_strategy().prop_map(|key| CacheOp::Remove { key }),
        1 => (1u64..500).prop_map(|ms| CacheOp::Advance { ms }),
    ]
}

fn build(options: CacheOptions) -> (InMemoryCache<String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = CacheBuilder::new(options)
        .clock(clock.clone())
        .build()
        .unwrap();
    (cache, clock)
}

fn apply(cache: &InMemoryCache<String>, clock: &ManualClock, op: &CacheOp) {
    match op {
        CacheOp::Add { key, value } => {
            let _ = cache.add(key.as_str(), value.clone(), None);
        }
        CacheOp::Get { key } => {
            let _ = cache.get(key);
        }
        CacheOp::Remove { key } => {
            let _ = cache.remove(key);
        }
        CacheOp::Advance { ms } => clock.advance(Duration::from_millis(*ms)),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Feature: tidy-cache, Property 1: Size Invariant**
    // *For any* sequence of operations, the reported size SHALL equal the
    // sum of resident entry sizes and the count SHALL equal the key count.
    #[test]
    fn prop_size_invariant(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let (cache, clock) = build(CacheOptions {
            hard_size_limit: 40,
            ..CacheOptions::default()
        });

        for op in &ops {
            apply(&cache, &clock, op);
            let entries = cache.store().snapshot();
            let sum: i64 = entries.iter().map(|e| e.size()).sum();
            prop_assert_eq!(cache.size(), sum);
            prop_assert_eq!(cache.count(), entries.len());
            prop_assert_eq!(cache.keys().len(), entries.len());
            prop_assert!(cache.size() <= 40);
        }
    }

    // **Feature: tidy-cache, Property 2: Hard Count Bound**
    // *For any* sequence of adds with a hard count limit of N and no pinned
    // entries, the count SHALL never exceed N.
    #[test]
    fn prop_hard_count_bound(
        limit in 1usize..6,
        ops in prop::collection::vec(cache_op_strategy(), 1..60)
    ) {
        let (cache, clock) = build(CacheOptions {
            hard_count_limit: limit,
            ..CacheOptions::default()
        });

        for op in &ops {
            apply(&cache, &clock, op);
            prop_assert!(cache.count() <= limit);
        }
    }

    // **Feature: tidy-cache, Property 3: Oldest Evicted First**
    // *For any* sequence of distinct keys added under a hard count limit of
    // N, the survivors SHALL be the last N keys in insertion order.
    #[test]
    fn prop_oldest_evicted_first(
        keys in prop::collection::hash_set("[a-z]{3,6}", 1..20),
        limit in 1usize..8
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let (cache, clock) = build(CacheOptions {
            hard_count_limit: limit,
            ..CacheOptions::default()
        });

        for key in &keys {
            cache.add(key.as_str(), "v".to_string(), None).unwrap();
            clock.advance(Duration::from_millis(1));
        }

        let expected: Vec<String> = keys.iter().rev().take(limit).rev().cloned().collect();
        prop_assert_eq!(cache.keys(), expected);
    }

    // **Feature: tidy-cache, Property 4: Remove Idempotence**
    // *For any* key, a second remove SHALL return nothing and leave the
    // count unchanged.
    #[test]
    fn prop_remove_idempotent(
        keys in prop::collection::vec(key_strategy(), 1..20),
        target in key_strategy()
    ) {
        let (cache, _) = build(CacheOptions::default());
        for key in &keys {
            cache.add(key.as_str(), key.clone(), None).unwrap();
        }

        let first = cache.remove(&target).unwrap();
        let count = cache.count();
        let second = cache.remove(&target).unwrap();

        prop_assert_eq!(first.is_some(), keys.contains(&target));
        prop_assert!(second.is_none());
        prop_assert_eq!(cache.count(), count);
    }

    // **Feature: tidy-cache, Property 5: Round-trip Storage Consistency**
    // *For any* set of key-value pairs added without limits or expiry, each
    // get SHALL return the last value added under that key.
    #[test]
    fn prop_round_trip(pairs in prop::collection::vec((key_strategy(), value_strategy()), 1..40)) {
        let (cache, _) = build(CacheOptions::default());
        let mut expected = HashMap::new();

        for (key, value) in &pairs {
            cache.add(key.as_str(), value.clone(), None).unwrap();
            expected.insert(key.clone(), value.clone());
        }

        for (key, value) in &expected {
            let got = cache.get(key).unwrap();
            prop_assert_eq!(got.as_deref(), Some(value));
        }
        let keys: HashSet<String> = cache.keys().into_iter().collect();
        prop_assert_eq!(keys.len(), expected.len());
    }

    // **Feature: tidy-cache, Property 6: Absolute Expiry**
    // *For any* entry with absolute deadline D, get SHALL find it strictly
    // before D and SHALL NOT find it at or after D.
    #[test]
    fn prop_absolute_expiry(lifetime in 1u64..10_000, probe in 0u64..20_000) {
        let (cache, clock) = build(CacheOptions::default());
        let deadline = clock.now_ms() + lifetime;
        let options = EntryOptions::new().with_absolute_deadline_ms(deadline);
        cache.add("k", "v".to_string(), Some(&options)).unwrap();

        clock.advance(Duration::from_millis(probe));
        let found = cache.get("k").unwrap().is_some();

        prop_assert_eq!(found, clock.now_ms() < deadline);
    }

    // **Feature: tidy-cache, Property 7: Statistics Accuracy**
    // *For any* sequence of operations, hits and misses SHALL match the
    // outcome of every get.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let (cache, clock) = build(CacheOptions::default());
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in &ops {
            match op {
                CacheOp::Get { key } => match cache.get(key).unwrap() {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                },
                other => apply(&cache, &clock, other),
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, cache.count(), "Total entries mismatch");
    }
}
