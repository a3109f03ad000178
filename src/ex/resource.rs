//! Executive Resource Implementation (ERESOURCE)
//!
//! An exclusive waitable lock with owner tracking and recursive
//! acquisition, the subset the object manager needs for its type-wide
//! serialization mutex.
//!
//! # NT Semantics
//!
//! - The owning context may re-acquire recursively; each acquire must be
//!   matched by a release
//! - Acquisition is only legal from a context that may wait (at or below
//!   APC_LEVEL); the caller asserts that before entering
//! - Contention is counted for observability
//!
//! # Usage
//! ```
//! use objmgr::ex::EResource;
//!
//! let resource = EResource::new();
//! resource.acquire_exclusive(true);
//! // ... serialized section ...
//! resource.release();
//! ```

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::ke;

/// Exclusive waitable resource with recursion.
pub struct EResource {
    /// Owning thread id, 0 when free
    owner_thread: AtomicUsize,
    /// Recursive acquisition count by the owner
    owner_count: AtomicU32,
    /// Number of acquisitions that found the resource held
    contention_count: AtomicU32,
}

impl EResource {
    /// Create a new unowned resource.
    pub const fn new() -> Self {
        Self {
            owner_thread: AtomicUsize::new(0),
            owner_count: AtomicU32::new(0),
            contention_count: AtomicU32::new(0),
        }
    }

    /// Acquire the resource exclusively.
    ///
    /// With `wait` set, spins until the resource is free; otherwise fails
    /// immediately when it is held by another context. Returns whether the
    /// resource was acquired.
    pub fn acquire_exclusive(&self, wait: bool) -> bool {
        let current = ke::current_thread_id();

        if self.owner_thread.load(Ordering::Relaxed) == current {
            // Recursive acquisition by the owner
            self.owner_count.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let mut contended = false;
        loop {
            match self.owner_thread.compare_exchange(
                0,
                current,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.owner_count.store(1, Ordering::Relaxed);
                    return true;
                }
                Err(_) => {
                    if !wait {
                        return false;
                    }
                    if !contended {
                        contended = true;
                        self.contention_count.fetch_add(1, Ordering::Relaxed);
                    }
                    while self.owner_thread.load(Ordering::Relaxed) != 0 {
                        core::hint::spin_loop();
                    }
                }
            }
        }
    }

    /// Try to acquire exclusively without waiting.
    pub fn try_acquire_exclusive(&self) -> bool {
        self.acquire_exclusive(false)
    }

    /// Release one acquisition of the resource.
    pub fn release(&self) {
        let current = ke::current_thread_id();
        if self.owner_thread.load(Ordering::Relaxed) != current {
            debug_assert!(false, "resource released by non-owner");
            log::error!("ex: resource release by thread {} while not owner", current);
            return;
        }

        let remaining = self.owner_count.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0 {
            self.owner_thread.store(0, Ordering::Release);
        }
    }

    /// Check whether the current context owns the resource.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner_thread.load(Ordering::Relaxed) == ke::current_thread_id()
    }

    /// Check whether any context owns the resource.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner_thread.load(Ordering::Relaxed) != 0
    }

    /// Number of times acquisition found the resource held.
    #[inline]
    pub fn contention_count(&self) -> u32 {
        self.contention_count.load(Ordering::Relaxed)
    }
}

impl Default for EResource {
    fn default() -> Self {
        Self::new()
    }
}
