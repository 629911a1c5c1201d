//! Reference-Counted Disposal
//!
//! [`AutoDisposer`] lets a cached resource outlive its eviction while a
//! reader still holds a [`Lease`] on it. Eviction only marks the resource;
//! it is disposed when the last lease is dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::cache::disposal::{
    CacheItem, DeferredDispose, Disposable, Disposal, DisposalFailureSink,
};

const SHOULD_DISPOSE: usize = 1 << (usize::BITS - 1);
const DISPOSED: usize = 1 << (usize::BITS - 2);
const REFS_MASK: usize = DISPOSED - 1;

// == Auto Disposer ==
/// Wraps a [`Disposable`] resource with a lease count.
///
/// State is one atomic word: the lease count in the low bits plus the
/// should-dispose and disposed flags. The resource is disposed exactly once,
/// when the count is zero and disposal has been requested.
pub struct AutoDisposer<R: Disposable> {
    resource: R,
    state: AtomicUsize,
    /// Where a failed disposal is reported; first requester wins
    on_failure: Mutex<Option<DisposalFailureSink>>,
}

impl<R: Disposable> AutoDisposer<R> {
    pub fn new(resource: R) -> Self {
        Self {
            resource,
            state: AtomicUsize::new(0),
            on_failure: Mutex::new(None),
        }
    }

    // == Acquire ==
    /// Takes a lease on the resource.
    ///
    /// Returns `None` once disposal has been requested.
    pub fn acquire(self: &Arc<Self>) -> Option<Lease<R>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & (SHOULD_DISPOSE | DISPOSED) != 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Lease {
                        owner: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn ref_count(&self) -> usize {
        self.state.load(Ordering::Acquire) & REFS_MASK
    }

    pub fn should_dispose(&self) -> bool {
        self.state.load(Ordering::Acquire) & SHOULD_DISPOSE != 0
    }

    /// Direct access without a lease; callers must know the resource is alive.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    fn release(&self) {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        if previous - 1 == SHOULD_DISPOSE {
            self.try_dispose();
        }
    }

    fn try_dispose(&self) {
        if self
            .state
            .compare_exchange(
                SHOULD_DISPOSE,
                SHOULD_DISPOSE | DISPOSED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            if let Err(err) = self.resource.dispose() {
                let sink = self.on_failure.lock().take();
                match sink {
                    Some(report) => report(&err),
                    None => warn!(error = %err, "Deferred disposal failed"),
                }
            }
        }
    }
}

impl<R: Disposable> DeferredDispose for AutoDisposer<R> {
    fn mark_should_dispose(&self, on_failure: Option<DisposalFailureSink>) {
        if let Some(sink) = on_failure {
            self.on_failure.lock().get_or_insert(sink);
        }
        let previous = self.state.fetch_or(SHOULD_DISPOSE, Ordering::AcqRel);
        if previous & REFS_MASK == 0 {
            self.try_dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) & DISPOSED != 0 || self.resource.is_disposed()
    }
}

impl<R: Disposable + 'static> CacheItem for AutoDisposer<R> {
    fn disposal(&self) -> Disposal<'_> {
        Disposal::Deferred(self)
    }
}

impl<R: Disposable> fmt::Debug for AutoDisposer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("AutoDisposer")
            .field("refs", &(state & REFS_MASK))
            .field("should_dispose", &(state & SHOULD_DISPOSE != 0))
            .field("disposed", &(state & DISPOSED != 0))
            .finish()
    }
}

// == Lease ==
/// An active hold on an [`AutoDisposer`] resource. Dropping it releases.
pub struct Lease<R: Disposable> {
    owner: Arc<AutoDisposer<R>>,
}

impl<R: Disposable> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.owner.resource
    }
}

impl<R: Disposable> Drop for Lease<R> {
    fn drop(&mut self) {
        self.owner.release();
    }
}

impl<R: Disposable> fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("owner", &self.owner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Connection {
        closes: AtomicU32,
    }

    impl Disposable for Connection {
        fn dispose(&self) -> anyhow::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_dispose_immediately_without_leases() {
        let d = Arc::new(AutoDisposer::new(Connection::default()));

        d.mark_should_dispose(None);
        assert!(d.is_disposed());
        assert_eq!(d.resource().closes.load(Ordering::SeqCst), 1);
        assert!(d.acquire().is_none());
    }

    #[test]
    fn test_dispose_waits_for_last_lease() {
        let d = Arc::new(AutoDisposer::new(Connection::default()));
        let a = d.acquire().unwrap();
        let b = d.acquire().unwrap();
        assert_eq!(d.ref_count(), 2);

        d.mark_should_dispose(None);
        assert!(!d.is_disposed());
        assert!(d.acquire().is_none(), "no new leases after eviction");
        assert_eq!(a.closes.load(Ordering::SeqCst), 0);

        drop(a);
        assert!(!d.is_disposed());
        drop(b);
        assert!(d.is_disposed());
        assert_eq!(d.resource().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mark_twice_disposes_once() {
        let d = Arc::new(AutoDisposer::new(Connection::default()));
        d.mark_should_dispose(None);
        d.mark_should_dispose(None);
        assert_eq!(d.resource().closes.load(Ordering::SeqCst), 1);
    }

    struct Stuck;

    impl Disposable for Stuck {
        fn dispose(&self) -> anyhow::Result<()> {
            anyhow::bail!("socket will not close")
        }
    }

    #[test]
    fn test_failure_after_last_lease_reaches_sink() {
        let d = Arc::new(AutoDisposer::new(Stuck));
        let lease = d.acquire().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);

        d.mark_should_dispose(Some(Box::new(move |err: &anyhow::Error| {
            seen2.lock().push(err.to_string())
        })));
        assert!(seen.lock().is_empty());

        drop(lease);
        assert!(d.is_disposed());
        assert_eq!(*seen.lock(), vec!["socket will not close".to_string()]);
    }

    #[test]
    fn test_concurrent_leases_dispose_exactly_once() {
        let d = Arc::new(AutoDisposer::new(Connection::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&d);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        if let Some(lease) = d.acquire() {
                            let _ = lease.closes.load(Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        d.mark_should_dispose(None);
        for h in handles {
            h.join().unwrap();
        }

        assert!(d.is_disposed());
        assert_eq!(d.ref_count(), 0);
        assert_eq!(d.resource().closes.load(Ordering::SeqCst), 1);
    }
}
