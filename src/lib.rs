//! NT-style object manager core.
//!
//! This crate implements the heart of an NT-like object manager as a
//! hosted, testable subsystem:
//!
//! - **Namespace**: hierarchical directories mapping names to
//!   reference-counted objects, protected by a reader/writer push lock
//! - **Query references**: a per-name atomic count that keeps an object's
//!   name and parent linkage alive while lookups are in flight, even after
//!   the directory lock has been released
//! - **Lookup contexts**: the per-operation protocol that pairs every lock
//!   acquisition and query reference with exactly one release
//! - **Type mutex**: a serialization gate around per-type callouts
//! - **Lookaside lists**: a two-tier per-processor free-list allocator for
//!   the transient records this machinery needs
//!
//! # Layout
//!
//! Subsystems follow the NT executive convention:
//!
//! - [`ke`]: scheduling state (IRQL, critical regions, thread identity)
//! - [`ex`]: executive support (push lock, resource, lookaside lists)
//! - [`ob`]: the object manager proper
//!
//! Scheduling state is modeled per execution context with thread-locals so
//! the concurrency invariants can be exercised deterministically from unit
//! tests with ordinary threads.

pub mod ex;
pub mod ke;
pub mod ob;
