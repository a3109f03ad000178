//! IRQL and critical-region state
//!
//! Each execution context carries an IRQL and a critical-region depth.
//! Raising IRQL restricts what synchronization is legal (no waiting at or
//! above DISPATCH_LEVEL); a critical region suspends normal rescheduling
//! without changing IRQL, which is what the directory lock and type mutex
//! paths require around their critical sections.
//!
//! # Usage
//! ```
//! use objmgr::ke;
//!
//! ke::enter_critical_region();
//! // ... non-preemptible critical section ...
//! ke::leave_critical_region();
//! ```

use core::sync::atomic::{AtomicUsize, Ordering};
use std::cell::Cell;

/// Interrupt request levels relevant to the object manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Irql {
    /// Normal thread execution
    Passive = 0,
    /// APC delivery disabled
    Apc = 1,
    /// Dispatcher level, no waiting allowed
    Dispatch = 2,
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_IRQL: Cell<Irql> = const { Cell::new(Irql::Passive) };
    static CRITICAL_REGION_DEPTH: Cell<u32> = const { Cell::new(0) };
    static THREAD_ID: Cell<usize> = const { Cell::new(0) };
}

/// Get the current context's IRQL.
#[inline]
pub fn current_irql() -> Irql {
    CURRENT_IRQL.with(|irql| irql.get())
}

/// Raise the current context's IRQL, returning the previous level.
///
/// The previous level must be passed back to [`lower_irql`].
pub fn raise_irql(new_irql: Irql) -> Irql {
    CURRENT_IRQL.with(|irql| {
        let old = irql.get();
        debug_assert!(new_irql >= old, "raise_irql would lower IRQL");
        irql.set(new_irql);
        old
    })
}

/// Lower the current context's IRQL back to a previously returned level.
pub fn lower_irql(old_irql: Irql) {
    CURRENT_IRQL.with(|irql| {
        debug_assert!(old_irql <= irql.get(), "lower_irql would raise IRQL");
        irql.set(old_irql);
    });
}

/// Enter a critical region, suspending normal rescheduling.
///
/// Critical regions nest; each enter must be matched by a leave.
pub fn enter_critical_region() {
    CRITICAL_REGION_DEPTH.with(|depth| depth.set(depth.get() + 1));
}

/// Leave a critical region.
pub fn leave_critical_region() {
    CRITICAL_REGION_DEPTH.with(|depth| {
        let current = depth.get();
        if current == 0 {
            debug_assert!(false, "leave_critical_region without matching enter");
            log::error!("ke: leave_critical_region without matching enter");
            return;
        }
        depth.set(current - 1);
    });
}

/// Check whether the current context is inside a critical region.
#[inline]
pub fn in_critical_region() -> bool {
    CRITICAL_REGION_DEPTH.with(|depth| depth.get() > 0)
}

/// Get a stable nonzero identifier for the current execution context.
pub fn current_thread_id() -> usize {
    THREAD_ID.with(|id| {
        let current = id.get();
        if current != 0 {
            return current;
        }
        let assigned = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        id.set(assigned);
        assigned
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irql_raise_lower() {
        assert_eq!(current_irql(), Irql::Passive);

        let old = raise_irql(Irql::Dispatch);
        assert_eq!(old, Irql::Passive);
        assert_eq!(current_irql(), Irql::Dispatch);

        lower_irql(old);
        assert_eq!(current_irql(), Irql::Passive);
    }

    #[test]
    fn test_critical_region_nesting() {
        assert!(!in_critical_region());

        enter_critical_region();
        enter_critical_region();
        assert!(in_critical_region());

        leave_critical_region();
        assert!(in_critical_region());

        leave_critical_region();
        assert!(!in_critical_region());
    }

    #[test]
    fn test_thread_ids_distinct() {
        let here = current_thread_id();
        assert_ne!(here, 0);
        assert_eq!(here, current_thread_id());

        let other = std::thread::spawn(ke_id).join().unwrap();
        assert_ne!(other, 0);
        assert_ne!(here, other);
    }

    fn ke_id() -> usize {
        current_thread_id()
    }
}
