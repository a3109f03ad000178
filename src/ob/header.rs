//! Object Header Implementation
//!
//! Every object carries a header with its pointer reference count and
//! flags, a type reference, and — once it has been inserted into the
//! namespace — a name info block.
//!
//! # Query References
//!
//! The name info block carries its own atomic count of "lookups still
//! interested in this name", distinct from the object's pointer count. It
//! starts at 1 for the namespace's own hold and is incremented while the
//! directory lock is held, which lets a lookup release the lock and keep
//! the name and parent linkage alive until it is done. The 1→0 transition
//! fires the name cleanup exactly once: the name buffer is released and
//! one reference on the parent directory is dropped with deferred-delete
//! semantics, because the decrementer may be inside a critical region.

use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use super::directory::Directory;
use super::object_type::ObjectType;
use super::{protocol_violation, reference, ObError};

bitflags! {
    /// Object header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// Object survives its pointer count reaching zero
        const PERMANENT = 0x02;
        /// Destruction has been handed to the deferred-delete queue
        const DEFER_DELETE = 0x10;
        /// Object is linked into the namespace
        const IN_NAMESPACE = 0x20;
    }
}

/// Object metadata: pointer reference count and flags.
pub struct ObjectHeader {
    pointer_count: AtomicI32,
    flags: AtomicU32,
}

impl ObjectHeader {
    /// Create a header with one initial reference.
    pub const fn new() -> Self {
        Self {
            pointer_count: AtomicI32::new(1),
            flags: AtomicU32::new(0),
        }
    }

    /// Increment the pointer count, returning the new value.
    #[inline]
    pub fn reference(&self) -> i32 {
        self.pointer_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pointer count.
    ///
    /// Returns true if this released the last reference.
    #[inline]
    pub fn dereference(&self) -> bool {
        let old = self.pointer_count.fetch_sub(1, Ordering::AcqRel);
        if old <= 0 {
            protocol_violation("object dereferenced below zero");
            self.pointer_count.fetch_add(1, Ordering::AcqRel);
            return false;
        }
        old == 1
    }

    /// Current pointer count.
    #[inline]
    pub fn pointer_count(&self) -> i32 {
        self.pointer_count.load(Ordering::Acquire)
    }

    /// Current flags.
    #[inline]
    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Set the given flags.
    #[inline]
    pub fn set_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clear the given flags.
    #[inline]
    pub fn clear_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Check whether all of the given flags are set.
    #[inline]
    pub fn has_flags(&self, flags: ObjectFlags) -> bool {
        self.flags().contains(flags)
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Namespace-attached metadata: name, parent link, query references.
pub struct ObjectNameInfo {
    /// Lookups still interested in this name
    query_references: AtomicU32,
    /// Display name; released on the last query-reference drop
    name: spin::Mutex<Option<String>>,
    /// Containing directory; traversal-only from the object's side, but
    /// the last query-reference drop owes it one dereference
    directory: spin::Mutex<Option<Arc<Object>>>,
}

impl ObjectNameInfo {
    fn new(name: &str, parent: Option<Arc<Object>>) -> Self {
        Self {
            query_references: AtomicU32::new(1),
            name: spin::Mutex::new(Some(name.to_owned())),
            directory: spin::Mutex::new(parent),
        }
    }

    /// Current query-reference count.
    #[inline]
    pub fn query_references(&self) -> u32 {
        self.query_references.load(Ordering::Acquire)
    }

    /// The object's display name, if not yet cleaned up.
    pub fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    /// The containing directory, if still linked.
    pub fn parent(&self) -> Option<Arc<Object>> {
        self.directory.lock().clone()
    }

    /// Drop one query reference.
    ///
    /// The 1→0 transition performs the name cleanup exactly once: the
    /// name buffer is reset to empty and the parent directory, if any, is
    /// unlinked and dereferenced with deferred-delete semantics.
    pub fn decrement_query_references(&self) {
        let old = self.query_references.fetch_sub(1, Ordering::AcqRel);
        if old == 0 {
            protocol_violation("query references decremented below zero");
            self.query_references.fetch_add(1, Ordering::AcqRel);
            return;
        }
        if old != 1 {
            return;
        }

        // Last interested lookup is gone
        *self.name.lock() = None;
        let parent = self.directory.lock().take();
        if let Some(parent) = parent {
            reference::dereference_object_defer_delete(parent);
        }
    }
}

/// Type-specific payload behind the header.
pub enum ObjectBody {
    /// Namespace node
    Directory(Directory),
    /// Anything else the namespace manages; opaque to this subsystem
    Opaque(Box<dyn Any + Send + Sync>),
}

/// A managed object: header, type, optional name info, payload.
pub struct Object {
    header: ObjectHeader,
    object_type: Arc<ObjectType>,
    /// Claimed by the single naming winner before `name_info` is filled
    naming_claimed: AtomicBool,
    name_info: spin::Once<ObjectNameInfo>,
    body: ObjectBody,
}

impl Object {
    /// Create an object of the given type with one initial reference,
    /// running the type's create callout if one is registered.
    pub fn new(object_type: Arc<ObjectType>, body: ObjectBody) -> Arc<Self> {
        object_type.increment_object_count();
        let object = Arc::new(Self {
            header: ObjectHeader::new(),
            object_type,
            naming_claimed: AtomicBool::new(false),
            name_info: spin::Once::new(),
            body,
        });
        object.object_type.invoke_create(&object);
        object
    }

    /// The object's header.
    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    /// The object's type.
    #[inline]
    pub fn object_type(&self) -> &Arc<ObjectType> {
        &self.object_type
    }

    /// The object's payload.
    #[inline]
    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    /// The object's directory payload, if it is a directory.
    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.body {
            ObjectBody::Directory(directory) => Some(directory),
            ObjectBody::Opaque(_) => None,
        }
    }

    /// Downcast an opaque payload.
    pub fn body_as<T: Any>(&self) -> Option<&T> {
        match &self.body {
            ObjectBody::Opaque(body) => body.downcast_ref(),
            ObjectBody::Directory(_) => None,
        }
    }

    /// Name info, present once the object has been inserted.
    #[inline]
    pub fn name_info(&self) -> Option<&ObjectNameInfo> {
        self.name_info.get()
    }

    /// The object's display name, if named and not yet cleaned up.
    pub fn name(&self) -> Option<String> {
        self.name_info.get().and_then(ObjectNameInfo::name)
    }

    /// Attach name info, taking one reference on the parent directory.
    ///
    /// An object is named at most once. The claim is decided atomically,
    /// so racing insertions into different directories see exactly one
    /// winner; losers fail without touching the parent's count.
    pub(crate) fn set_name_info(
        &self,
        name: &str,
        parent: Option<&Arc<Object>>,
    ) -> Result<(), ObError> {
        if self
            .naming_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ObError::NameCollision);
        }
        if let Some(parent) = parent {
            reference::reference_object(parent);
        }
        self.name_info
            .call_once(|| ObjectNameInfo::new(name, parent.cloned()));
        Ok(())
    }

    /// Take a query reference on this object's name.
    ///
    /// Fails with `RemovalInProgress` when the count has already reached
    /// zero or when destruction has been deferred; the caller must
    /// re-resolve from the directory rather than reuse the candidate.
    pub fn try_increment_query_references(&self) -> Result<(), ObError> {
        let info = match self.name_info.get() {
            Some(info) => info,
            None => return Err(ObError::RemovalInProgress),
        };

        loop {
            let current = info.query_references.load(Ordering::Acquire);
            if current == 0 {
                return Err(ObError::RemovalInProgress);
            }
            if info
                .query_references
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if self.header.has_flags(ObjectFlags::DEFER_DELETE) {
                    // Destruction already queued: back the increment out
                    // and make the caller requery the directory
                    info.decrement_query_references();
                    return Err(ObError::RemovalInProgress);
                }
                return Ok(());
            }
        }
    }
}
