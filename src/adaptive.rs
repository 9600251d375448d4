//! Live-updatable shared values.
//!
//! The admission controller keeps its [`QuotaLimits`](crate::QuotaLimits) in a
//! [`DynamicConfig`] so they can be swapped while submissions are in flight.
//! Default backend is `ArcSwap` for lock-free reads; the `adaptive-rwlock`
//! feature switches to an `RwLock`.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::{PoisonError, RwLock};

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// Shared value with cheap snapshot reads and atomic replacement.
///
/// Clones observe the same value.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(Arc::new(value))) }
        }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.load_full()
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    /// Install a new value, returning the one it replaced.
    pub fn replace(&self, value: T) -> Arc<T> {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.swap(Arc::new(value))
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, Arc::new(value))
        }
    }

    /// Derive the next value from the current one.
    ///
    /// Concurrent updates are not lost: with the `ArcSwap` backend the closure
    /// may run more than once if another writer races it.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&T) -> T,
    {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.rcu(|cur| Arc::new(f(cur)));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let next = f(&guard);
            *guard = Arc::new(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DynamicConfig;
    use crate::QuotaLimits;
    use std::time::Duration;

    #[test]
    fn replace_returns_previous_limits() {
        let live = DynamicConfig::new(QuotaLimits::default());
        let next = QuotaLimits::new(10, Duration::from_secs(1), Duration::ZERO);

        let previous = live.replace(next);
        assert_eq!(previous.call_limit, 1000);
        assert_eq!(*live.get(), next);
    }

    #[test]
    fn clones_share_updates() {
        let live = DynamicConfig::new(QuotaLimits::default());
        let observer = live.clone();

        live.update(|cur| QuotaLimits { call_limit: cur.call_limit / 2, ..*cur });
        assert_eq!(observer.get().call_limit, 500);
    }
}
