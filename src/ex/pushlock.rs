//! Push Lock Implementation (EX_PUSH_LOCK)
//!
//! Push locks are lightweight reader-writer locks optimized for
//! read-heavy workloads, used here to protect directory entry tables.
//!
//! # NT Semantics
//!
//! - Single word of state, one atomic operation in uncontended cases
//! - Any number of shared holders, or exactly one exclusive holder
//! - No reentrancy: a logical operation takes at most one acquisition on
//!   a given lock at a time
//!
//! # States
//!
//! - Bit 0: locked exclusive
//! - Bits 1+: share count
//!
//! # Usage
//! ```
//! use objmgr::ex::PushLock;
//!
//! let lock = PushLock::new();
//! lock.acquire_shared();
//! // ... read critical section ...
//! lock.release_shared();
//! ```

use core::sync::atomic::{AtomicUsize, Ordering};

const PUSH_LOCK_EXCLUSIVE: usize = 0x1;
const PUSH_LOCK_SHARE_INC: usize = 0x2;
const PUSH_LOCK_SHARE_MASK: usize = !PUSH_LOCK_EXCLUSIVE;

/// Compact reader/writer lock.
pub struct PushLock {
    value: AtomicUsize,
}

impl PushLock {
    /// Create a new unlocked push lock.
    pub const fn new() -> Self {
        Self {
            value: AtomicUsize::new(0),
        }
    }

    /// Acquire the lock exclusively (write lock), spinning until free.
    pub fn acquire_exclusive(&self) {
        loop {
            if self
                .value
                .compare_exchange_weak(0, PUSH_LOCK_EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            while self.value.load(Ordering::Relaxed) != 0 {
                core::hint::spin_loop();
            }
        }
    }

    /// Try to acquire the lock exclusively without blocking.
    pub fn try_acquire_exclusive(&self) -> bool {
        self.value
            .compare_exchange(0, PUSH_LOCK_EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release an exclusively held lock.
    pub fn release_exclusive(&self) {
        let old = self.value.swap(0, Ordering::Release);
        if old != PUSH_LOCK_EXCLUSIVE {
            debug_assert!(false, "push lock released exclusive while not held exclusive");
            log::error!("ex: push lock exclusive release with state {:#x}", old);
        }
    }

    /// Acquire the lock in shared mode (read lock), spinning while an
    /// exclusive holder is present.
    pub fn acquire_shared(&self) {
        loop {
            let current = self.value.load(Ordering::Relaxed);
            if current & PUSH_LOCK_EXCLUSIVE != 0 {
                core::hint::spin_loop();
                continue;
            }
            if self
                .value
                .compare_exchange_weak(
                    current,
                    current + PUSH_LOCK_SHARE_INC,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Try to acquire the lock in shared mode without blocking.
    pub fn try_acquire_shared(&self) -> bool {
        let current = self.value.load(Ordering::Relaxed);
        if current & PUSH_LOCK_EXCLUSIVE != 0 {
            return false;
        }
        self.value
            .compare_exchange(
                current,
                current + PUSH_LOCK_SHARE_INC,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Release a shared hold on the lock.
    pub fn release_shared(&self) {
        let old = self.value.fetch_sub(PUSH_LOCK_SHARE_INC, Ordering::Release);
        if old & PUSH_LOCK_SHARE_MASK == 0 {
            debug_assert!(false, "push lock released shared while not held shared");
            log::error!("ex: push lock shared release with state {:#x}", old);
            self.value.fetch_add(PUSH_LOCK_SHARE_INC, Ordering::Relaxed);
        }
    }

    /// Check if the lock is held exclusively.
    #[inline]
    pub fn is_locked_exclusive(&self) -> bool {
        self.value.load(Ordering::Relaxed) & PUSH_LOCK_EXCLUSIVE != 0
    }

    /// Check if the lock is held in shared mode.
    #[inline]
    pub fn is_locked_shared(&self) -> bool {
        self.value.load(Ordering::Relaxed) & PUSH_LOCK_SHARE_MASK != 0
    }

    /// Check if the lock is held in either mode.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.value.load(Ordering::Relaxed) != 0
    }

    /// Get the current number of shared holders.
    #[inline]
    pub fn share_count(&self) -> usize {
        (self.value.load(Ordering::Relaxed) & PUSH_LOCK_SHARE_MASK) >> 1
    }
}

impl Default for PushLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_exclusive_lock() {
        let lock = PushLock::new();

        assert!(!lock.is_locked_exclusive());

        lock.acquire_exclusive();
        assert!(lock.is_locked_exclusive());
        assert!(!lock.try_acquire_exclusive());
        assert!(!lock.try_acquire_shared());

        lock.release_exclusive();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_shared_lock() {
        let lock = PushLock::new();

        lock.acquire_shared();
        lock.acquire_shared();
        assert_eq!(lock.share_count(), 2);
        assert!(!lock.try_acquire_exclusive());

        lock.release_shared();
        assert!(!lock.try_acquire_exclusive());

        lock.release_shared();
        assert_eq!(lock.share_count(), 0);
        assert!(lock.try_acquire_exclusive());
        lock.release_exclusive();
    }

    // Two shared holders do not block each other; an exclusive acquirer
    // blocks until both have released.
    #[test]
    fn test_exclusive_waits_for_shared_holders() {
        let lock = Arc::new(PushLock::new());
        let acquired = Arc::new(AtomicBool::new(false));

        lock.acquire_shared();
        lock.acquire_shared();

        let writer = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                lock.acquire_exclusive();
                acquired.store(true, Ordering::SeqCst);
                lock.release_exclusive();
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));

        lock.release_shared();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));

        lock.release_shared();
        writer.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    // No two contexts observe the exclusive section at once.
    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(PushLock::new());
        let in_section = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let in_section = Arc::clone(&in_section);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        lock.acquire_exclusive();
                        let holders = in_section.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(holders, 0);
                        in_section.fetch_sub(1, Ordering::SeqCst);
                        lock.release_exclusive();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!lock.is_locked());
    }
}
