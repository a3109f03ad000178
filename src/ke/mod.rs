//! Kernel scheduling state (ke)
//!
//! The object manager's locking rules are expressed against NT scheduling
//! state: IRQL bounds on where a lock may be taken, and critical regions
//! that suspend normal rescheduling for the duration of a critical
//! section.
//!
//! # IRQL (Interrupt Request Level)
//!
//! - PASSIVE_LEVEL (0): normal thread execution, blocking allowed
//! - APC_LEVEL (1): APC delivery disabled, blocking still allowed
//! - DISPATCH_LEVEL (2): no blocking, spin-only synchronization
//!
//! In this hosted build the state lives in thread-locals, one set per
//! execution context, so lock-discipline invariants can be asserted and
//! tested deterministically with ordinary threads.

pub mod irql;

pub use irql::{
    current_irql, current_thread_id, enter_critical_region, in_critical_region,
    leave_critical_region, lower_irql, raise_irql, Irql,
};
