//! Object Manager (ob)
//!
//! A concurrent, hierarchical namespace of reference-counted objects:
//!
//! - **Objects**: header (pointer count, flags), type, optional name info
//! - **Directories**: namespace nodes mapping names to object references,
//!   protected by a push lock taken inside a critical region
//! - **Query references**: per-name atomic count keeping an object's name
//!   and parent linkage alive while lookups are in flight
//! - **Lookup contexts**: per-operation protocol guaranteeing symmetric
//!   release of the lock and the query reference on every exit path
//! - **Object types**: per-type callout table serialized by a type-wide
//!   mutex
//!
//! # Lookup flow
//!
//! Open a [`LookupContext`] → acquire the directory lock (shared for a
//! read, exclusive for a structural change) → resolve the name, taking a
//! query reference on the hit → release the lock while the query
//! reference keeps the name alive → work → clean the context up, which
//! drops the query reference and possibly the caller's object reference.

pub mod directory;
pub mod header;
pub mod lookup;
pub mod object_type;
pub mod reference;
pub mod trace;

pub use directory::{create_directory_object, insert_object, remove_object, Directory};
pub use header::{Object, ObjectBody, ObjectFlags, ObjectHeader, ObjectNameInfo};
pub use lookup::{lookup_object, lookup_object_path, LookupContext, LookupIntent};
pub use object_type::{CreateProcedure, DeleteProcedure, ObjectType, ObjectTypeCallbacks};
pub use reference::{
    dereference_object, dereference_object_defer_delete, drain_deferred_deletes,
    reference_object,
};
pub use trace::{set_trace_hook, ObTraceEvent, ObTraceHook};

use core::fmt;

/// Object manager error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObError {
    /// The name does not resolve in the directory
    NotFound,
    /// A query reference observed a zero count or a deferred delete;
    /// the caller must re-resolve from the directory
    RemovalInProgress,
    /// The general pool failed on a lookaside miss path
    AllocatorExhausted,
    /// The name already resolves to another object
    NameCollision,
    /// The directory's entry table is full
    DirectoryFull,
}

impl fmt::Display for ObError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ObError::NotFound => "object name not found",
            ObError::RemovalInProgress => "object removal in progress",
            ObError::AllocatorExhausted => "allocator exhausted",
            ObError::NameCollision => "object name collision",
            ObError::DirectoryFull => "directory full",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ObError {}

impl From<crate::ex::AllocatorExhausted> for ObError {
    fn from(_: crate::ex::AllocatorExhausted) -> Self {
        ObError::AllocatorExhausted
    }
}

/// Contract violation in the locking or context protocol.
///
/// Fatal in debug builds; a logged no-op guard in release builds.
pub(crate) fn protocol_violation(message: &str) {
    debug_assert!(false, "ob protocol violation: {}", message);
    log::error!("ob: protocol violation: {}", message);
}
