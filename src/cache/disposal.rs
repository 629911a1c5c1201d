//! Disposal Module
//!
//! Decides how an item leaving the cache gets released: immediately,
//! deferred until its last holder lets go, or not at all.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::stats::StatsCounter;

// == Capabilities ==
/// An item that owns a resource which must be released explicitly.
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;

    /// Whether the item has already been disposed, possibly by its owner
    /// outside the cache.
    fn is_disposed(&self) -> bool {
        false
    }
}

/// Called with the error when a deferred disposal fails.
pub type DisposalFailureSink = Box<dyn FnOnce(&anyhow::Error) + Send>;

/// An item shared with outside holders; disposal is requested, then
/// performed when the last holder releases it.
pub trait DeferredDispose: Send + Sync {
    /// Requests disposal. A failure, whenever the disposal finally runs, is
    /// handed to `on_failure`.
    fn mark_should_dispose(&self, on_failure: Option<DisposalFailureSink>);

    fn is_disposed(&self) -> bool;
}

/// How the coordinator should release an item.
pub enum Disposal<'a> {
    /// Owned elsewhere or holds nothing to release
    None,
    Immediate(&'a dyn Disposable),
    Deferred(&'a dyn DeferredDispose),
}

impl Disposal<'_> {
    pub fn is_disposed(&self) -> bool {
        match self {
            Disposal::None => false,
            Disposal::Immediate(d) => d.is_disposed(),
            Disposal::Deferred(d) => d.is_disposed(),
        }
    }
}

// == Cache Item ==
/// Anything that can be stored in an [`InMemoryCache`](crate::cache::InMemoryCache).
///
/// Both methods have defaults: size 1 (unless options override it) and no
/// disposal.
pub trait CacheItem: Send + Sync + 'static {
    /// Cost of the item in application-defined units.
    fn size(&self) -> Option<i64> {
        None
    }

    fn disposal(&self) -> Disposal<'_> {
        Disposal::None
    }
}

impl CacheItem for String {
    fn size(&self) -> Option<i64> {
        Some(self.len() as i64)
    }
}

impl CacheItem for Vec<u8> {
    fn size(&self) -> Option<i64> {
        Some(self.len() as i64)
    }
}

macro_rules! plain_cache_item {
    ($($t:ty),*) => {
        $(impl CacheItem for $t {})*
    };
}

plain_cache_item!(bool, char, i32, i64, u32, u64, usize, f64);

// == Release Outcome ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Nothing to release
    Skipped,
    Disposed,
    /// Marked; the last holder will dispose it
    Deferred,
    /// `dispose` raised an error, which was reported
    Failed,
}

/// Receives the key and error of every failed disposal.
pub type DisposalErrorHandler = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

// == Disposal Coordinator ==
/// Releases items evicted or removed from the cache.
///
/// Disposal errors are isolated per item: they are logged, counted and
/// forwarded to the error handler, never returned to the reduction that
/// triggered them.
pub struct DisposalCoordinator {
    stats: Arc<StatsCounter>,
    on_error: Arc<RwLock<Option<DisposalErrorHandler>>>,
}

impl DisposalCoordinator {
    pub fn new(stats: Arc<StatsCounter>) -> Self {
        Self {
            stats,
            on_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_error_handler(&self, handler: DisposalErrorHandler) {
        *self.on_error.write() = Some(handler);
    }

    // == Release ==
    pub fn release<T: CacheItem + ?Sized>(&self, key: &str, item: &T) -> ReleaseOutcome {
        match item.disposal() {
            Disposal::None => ReleaseOutcome::Skipped,
            Disposal::Deferred(deferred) => {
                deferred.mark_should_dispose(Some(self.failure_sink(key)));
                debug!(key, "Marked shared item for disposal");
                ReleaseOutcome::Deferred
            }
            Disposal::Immediate(disposable) => {
                if disposable.is_disposed() {
                    return ReleaseOutcome::Skipped;
                }
                match disposable.dispose() {
                    Ok(()) => ReleaseOutcome::Disposed,
                    Err(err) => {
                        self.report(key, &err);
                        ReleaseOutcome::Failed
                    }
                }
            }
        }
    }

    fn report(&self, key: &str, err: &anyhow::Error) {
        report_failure(&self.stats, &self.on_error, key, err);
    }

    /// Reports a deferred failure the same way as an immediate one, even if
    /// it happens long after the entry left the cache.
    fn failure_sink(&self, key: &str) -> DisposalFailureSink {
        let key = key.to_string();
        let stats = Arc::clone(&self.stats);
        let on_error = Arc::clone(&self.on_error);
        Box::new(move |err: &anyhow::Error| {
            report_failure(&stats, &on_error, &key, err)
        })
    }
}

fn report_failure(
    stats: &StatsCounter,
    on_error: &RwLock<Option<DisposalErrorHandler>>,
    key: &str,
    err: &anyhow::Error,
) {
    warn!(key, error = %err, "Failed to dispose cache item");
    stats.record_disposal_failure();
    let handler = on_error.read().clone();
    if let Some(handler) = handler {
        handler(key, err);
    }
}

impl fmt::Debug for DisposalCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposalCoordinator")
            .field("has_error_handler", &self.on_error.read().is_some())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Handle {
        disposed: AtomicBool,
        fail: bool,
    }

    impl Disposable for Handle {
        fn dispose(&self) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("handle is stuck");
            }
            self.disposed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    impl CacheItem for Handle {
        fn disposal(&self) -> Disposal<'_> {
            Disposal::Immediate(self)
        }
    }

    fn coordinator() -> (DisposalCoordinator, Arc<StatsCounter>) {
        let stats = Arc::new(StatsCounter::new());
        (DisposalCoordinator::new(stats.clone()), stats)
    }

    #[test]
    fn test_plain_item_is_skipped() {
        let (coord, _) = coordinator();
        assert_eq!(coord.release("k", &"text".to_string()), ReleaseOutcome::Skipped);
    }

    #[test]
    fn test_disposable_item_is_disposed_once() {
        let (coord, _) = coordinator();
        let handle = Handle::default();

        assert_eq!(coord.release("k", &handle), ReleaseOutcome::Disposed);
        assert!(handle.is_disposed());
        assert_eq!(coord.release("k", &handle), ReleaseOutcome::Skipped);
    }

    #[test]
    fn test_failure_is_reported_not_propagated() {
        let (coord, stats) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        coord.set_error_handler(Arc::new(move |key, err| {
            assert_eq!(key, "bad");
            assert!(err.to_string().contains("stuck"));
            calls2.fetch_add(1, Ordering::SeqCst);
        }));

        let handle = Handle {
            fail: true,
            ..Handle::default()
        };
        assert_eq!(coord.release("bad", &handle), ReleaseOutcome::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot(0, 0).disposal_failures, 1);
    }

    #[test]
    fn test_string_size() {
        assert_eq!("abcd".to_string().size(), Some(4));
        assert_eq!(7_u64.size(), None);
    }
}
