//! Tidy Cache - A bounded in-memory cache with background tidying
//!
//! Provides expiring entries, hard and soft count/size limits, age, idle and
//! memory based reduction, and disposal of evicted items.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod console;
pub mod error;
pub mod models;
pub mod tasks;

pub use cache::{
    AddOutcome, AutoDisposer, CacheBuilder, CacheEntry, CacheItem, CacheStats, Clock, Disposable,
    EntryOptions, InMemoryCache, ManualClock, ObjectCache, RemovalCause, Strategy, SystemClock,
};
pub use cancel::CancellationToken;
pub use config::CacheOptions;
pub use error::{CacheError, Result};
pub use tasks::{spawn_tidy_task, HostedService, ServiceHost, TidyWorker};
