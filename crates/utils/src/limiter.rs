//! Bounded concurrency gate for inbound connections, mirroring the shape of
//! teacher's `utils::listener::limiter::ConcurrencyLimiter` (constructed as
//! `ConcurrencyLimiter::new(max)` and queried with `.is_active()` at each
//! accepted connection in `ServerInstance`). A limit of `0` means unbounded,
//! matching teacher's convention for `ConcurrencyLimiter::new(0)` on sessions
//! that should never be throttled (e.g. the local-delivery test harness).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    max_concurrent: u64,
    concurrent: AtomicU64,
}

/// Cheaply cloneable handle shared by every task gated by the same limit.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

/// Dropping this releases the slot it was granted.
#[derive(Debug)]
pub struct InFlight {
    concurrent: Arc<Inner>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.concurrent.concurrent.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: u64) -> Self {
        ConcurrencyLimiter {
            inner: Arc::new(Inner { max_concurrent, concurrent: AtomicU64::new(0) }),
        }
    }

    /// Attempts to reserve a slot. Returns `None` (and rejects the caller)
    /// once `max_concurrent` in-flight guards are outstanding; `0` disables
    /// the limit entirely.
    pub fn is_allowed(&self) -> Option<InFlight> {
        if self.inner.max_concurrent == 0 {
            return Some(InFlight { concurrent: self.inner.clone() });
        }
        let prev = self.inner.concurrent.fetch_add(1, Ordering::Relaxed);
        if prev < self.inner.max_concurrent {
            Some(InFlight { concurrent: self.inner.clone() })
        } else {
            self.inner.concurrent.fetch_sub(1, Ordering::Relaxed);
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.concurrent.load(Ordering::Relaxed) > 0
    }
}
