//! Console Handlers
//!
//! One handler per console command, each running against the shared cache.

use std::time::Duration;

use crate::cache::{AddOutcome, CacheItem, EntryOptions, InMemoryCache};
use crate::cancel::CancellationToken;
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, KeysResponse, SetResponse, StatsResponse,
    TidyResponse,
};
use crate::tasks::tidy_once;

/// State shared by every console handler.
#[derive(Clone, Debug)]
pub struct ConsoleState {
    pub cache: InMemoryCache<String>,
}

impl ConsoleState {
    pub fn new(cache: InMemoryCache<String>) -> Self {
        Self { cache }
    }

    /// Creates the state with a fresh cache built from `options`.
    pub fn from_options(options: CacheOptions) -> Result<Self> {
        Ok(Self::new(InMemoryCache::new(options)?))
    }
}

/// Handler for `SET key value [ttl_secs]`
///
/// Without a TTL the cache's default entry options apply.
pub fn set_handler(
    state: &ConsoleState,
    key: &str,
    value: String,
    ttl: Option<u64>,
) -> Result<SetResponse> {
    let options = ttl.map(|secs| EntryOptions::new().with_timeout(Duration::from_secs(secs)));
    let outcome = state.cache.add(key, value, options.as_ref())?;
    Ok(SetResponse::new(key, replaced(&outcome)))
}

/// Handler for `PIN key value`
pub fn pin_handler(state: &ConsoleState, key: &str, value: String) -> Result<SetResponse> {
    let options = EntryOptions::new().pinned();
    let outcome = state.cache.add(key, value, Some(&options))?;
    Ok(SetResponse::new(key, replaced(&outcome)))
}

/// Handler for `GET key`
pub fn get_handler(state: &ConsoleState, key: &str) -> Result<GetResponse> {
    let entry = state
        .cache
        .get_entry(key)?
        .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
    let now = state.cache.store().now_ms();
    Ok(GetResponse::from_entry(&entry, now))
}

/// Handler for `DEL key`
pub fn delete_handler(state: &ConsoleState, key: &str) -> Result<DeleteResponse> {
    state
        .cache
        .remove(key)?
        .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
    Ok(DeleteResponse::new(key))
}

pub fn keys_handler(state: &ConsoleState) -> KeysResponse {
    KeysResponse::new(state.cache.keys())
}

pub fn stats_handler(state: &ConsoleState) -> StatsResponse {
    StatsResponse::from(state.cache.stats())
}

/// Handler for `TIDY`: runs one tidy cycle immediately.
pub fn tidy_handler(state: &ConsoleState) -> Result<TidyResponse> {
    if state.cache.is_disposed() {
        return Err(CacheError::Disposed);
    }
    let report = tidy_once(&state.cache, &CancellationToken::new());
    Ok(TidyResponse::new(report))
}

/// Handler for `CLEAR`; cleared items are disposed.
pub fn clear_handler(state: &ConsoleState) -> Result<ClearResponse> {
    let cleared = state.cache.clear(true)?;
    Ok(ClearResponse {
        cleared: cleared.len(),
    })
}

fn replaced<T: CacheItem>(outcome: &AddOutcome<T>) -> bool {
    matches!(
        outcome,
        AddOutcome::Inserted {
            replaced: Some(_),
            ..
        }
    )
}
