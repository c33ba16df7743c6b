//! Reference-counted shared resource pool
//!
//! Bindings usually hold one expensive shared resource per process (a
//! cluster handle, a session, a connection pool) while every worker thread
//! gets its own backend instance. The pool makes that lifecycle explicit:
//! the first `acquire` runs the factory, later acquires only bump the
//! count, and the `release` that brings the count back to zero runs the
//! teardown. Nothing here relies on process-wide mutable statics; the pool
//! is an ordinary injectable value shared via `Arc`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::Result;

/// Internal-consistency faults in the resource lifecycle.
///
/// These are unrecoverable: a run that observes one must halt rather than
/// silently continue with a corrupted reference count.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("resource pool reference count went negative ({0})")]
    NegativeRefCount(i64),
}

/// Shared resource with an atomic reference count and explicit
/// acquire/release lifecycle.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tracepulse::store::pool::RefCountedPool;
///
/// let pool: Arc<RefCountedPool<String>> = Arc::new(RefCountedPool::new());
///
/// let session = pool.acquire(|| Ok("connected".to_string()))?;
/// assert_eq!(*session, "connected");
/// assert_eq!(pool.ref_count(), 1);
///
/// pool.release(|_session| Ok(()))?;
/// assert_eq!(pool.ref_count(), 0);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct RefCountedPool<R> {
    /// The shared resource, present between first acquire and last release
    slot: Mutex<Option<Arc<R>>>,
    /// Outstanding references; readable without taking the slot lock
    refs: AtomicI64,
}

impl<R> RefCountedPool<R> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            refs: AtomicI64::new(0),
        }
    }

    /// Acquire the shared resource, constructing it on the first call.
    ///
    /// Concurrent first acquires are serialized on the slot lock, so the
    /// factory runs exactly once per resource lifetime. A factory failure
    /// leaves the pool empty and the count untouched.
    pub fn acquire<F>(&self, factory: F) -> Result<Arc<R>>
    where
        F: FnOnce() -> Result<R>,
    {
        let mut slot = self.slot.lock().unwrap();
        let resource = match slot.as_ref() {
            Some(resource) => Arc::clone(resource),
            None => {
                let resource = Arc::new(factory()?);
                *slot = Some(Arc::clone(&resource));
                tracing::debug!("shared backend resource acquired");
                resource
            }
        };
        self.refs.fetch_add(1, Ordering::SeqCst);
        Ok(resource)
    }

    /// Release one reference; the call that reaches zero runs the teardown.
    ///
    /// A count that would go negative is an internal-consistency fault and
    /// returns [`PoolError::NegativeRefCount`] without running the teardown.
    pub fn release<F>(&self, teardown: F) -> Result<()>
    where
        F: FnOnce(&R) -> Result<()>,
    {
        let mut slot = self.slot.lock().unwrap();
        let remaining = self.refs.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining < 0 {
            // Undo the decrement so the fault is observable, then halt the run
            self.refs.fetch_add(1, Ordering::SeqCst);
            return Err(PoolError::NegativeRefCount(remaining).into());
        }
        if remaining == 0 {
            if let Some(resource) = slot.take() {
                teardown(&resource)?;
                tracing::debug!("shared backend resource released");
            }
        }
        Ok(())
    }

    /// Current number of outstanding references.
    pub fn ref_count(&self) -> i64 {
        self.refs.load(Ordering::SeqCst)
    }
}

impl<R> Default for RefCountedPool<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_factory_runs_once() {
        let pool: RefCountedPool<u32> = RefCountedPool::new();
        let built = AtomicUsize::new(0);

        for _ in 0..5 {
            let value = pool
                .acquire(|| {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .unwrap();
            assert_eq!(*value, 7);
        }

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(), 5);
    }

    #[test]
    fn test_teardown_on_last_release() {
        let pool: RefCountedPool<u32> = RefCountedPool::new();
        let released = AtomicUsize::new(0);

        pool.acquire(|| Ok(1)).unwrap();
        pool.acquire(|| Ok(1)).unwrap();

        pool.release(|_| {
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 0);

        pool.release(|_| {
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(), 0);
    }

    #[test]
    fn test_negative_count_is_fatal() {
        let pool: RefCountedPool<u32> = RefCountedPool::new();
        let result = pool.release(|_| Ok(()));
        assert!(result.is_err());
        // The fault leaves the count where it was
        assert_eq!(pool.ref_count(), 0);
    }

    #[test]
    fn test_factory_failure_leaves_pool_empty() {
        let pool: RefCountedPool<u32> = RefCountedPool::new();
        assert!(pool.acquire(|| Err(anyhow!("connect refused"))).is_err());
        assert_eq!(pool.ref_count(), 0);

        // A later acquire can still succeed
        assert!(pool.acquire(|| Ok(3)).is_ok());
        assert_eq!(pool.ref_count(), 1);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool: Arc<RefCountedPool<u32>> = Arc::new(RefCountedPool::new());
        let built = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let built = Arc::clone(&built);
                thread::spawn(move || {
                    pool.acquire(|| {
                        built.fetch_add(1, Ordering::SeqCst);
                        Ok(9)
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(), threads as i64);

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    pool.release(|_| {
                        released.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one underlying release, and only after the last cleanup
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(), 0);
    }
}
