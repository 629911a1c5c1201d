//! Cache Module
//!
//! Bounded in-memory caching: expiring entries, hard limits enforced on
//! insert, soft limits and age/idle limits enforced by the tidy worker, and
//! disposal of evicted items.

mod admission;
mod auto_disposer;
mod builder;
mod clock;
mod disposal;
mod entry;
mod events;
mod in_memory;
mod object;
mod policy;
mod stats;
mod store;
mod striped;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use admission::{AdmissionController, HardLimits};
pub use auto_disposer::{AutoDisposer, Lease};
pub use builder::CacheBuilder;
pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use disposal::{
    CacheItem, DeferredDispose, Disposable, Disposal, DisposalCoordinator, DisposalErrorHandler,
    DisposalFailureSink, ReleaseOutcome,
};
pub use entry::{CacheEntry, EntryOptions, EvictionClass, Expiry};
pub use events::{
    CacheEntryEvent, CacheEvents, EntryEvent, RemovalCause, StoreChange, Subscribers, Subscription,
};
pub use in_memory::{AddOutcome, InMemoryCache};
pub use object::{AnyItem, ObjectCache};
pub use policy::{EvictionPolicyEngine, MemoryProbe, Reduction, Strategy};
pub use stats::{CacheStats, StatsCounter};
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
