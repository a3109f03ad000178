//! Object Directory Implementation
//!
//! Directories are the namespace nodes: a fixed table of name→object
//! entries protected by a push lock. Readers traverse concurrently under
//! the shared lock; structural changes require the exclusive lock. Both
//! acquisitions happen inside a critical region so the holder is not
//! rescheduled mid-section.
//!
//! Names are compared case-insensitively, with an uppercase hash stored
//! per entry to skip most comparisons.

use std::cell::UnsafeCell;
use std::sync::Arc;

use super::header::{Object, ObjectBody, ObjectFlags};
use super::lookup::{LookupContext, LookupIntent};
use super::object_type::{ObjectType, ObjectTypeCallbacks};
use super::{protocol_violation, reference, trace, ObError};
use crate::ex::PushLock;
use crate::ke;

/// Maximum entries per directory.
pub const MAX_DIRECTORY_ENTRIES: usize = 64;

struct DirectoryEntry {
    /// Object reference; `None` marks a free slot
    object: Option<Arc<Object>>,
    /// Case-insensitive hash of the entry's name
    name_hash: u32,
}

impl DirectoryEntry {
    const fn empty() -> Self {
        Self {
            object: None,
            name_hash: 0,
        }
    }
}

struct DirectoryTable {
    entries: [DirectoryEntry; MAX_DIRECTORY_ENTRIES],
    count: u32,
}

/// A namespace directory: name→object entries behind a push lock.
pub struct Directory {
    lock: PushLock,
    table: UnsafeCell<DirectoryTable>,
}

// Safety: the entry table is only touched through the locked accessors.
unsafe impl Sync for Directory {}
unsafe impl Send for Directory {}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            lock: PushLock::new(),
            table: UnsafeCell::new(DirectoryTable {
                entries: [const { DirectoryEntry::empty() }; MAX_DIRECTORY_ENTRIES],
                count: 0,
            }),
        }
    }

    /// Case-insensitive name hash.
    fn hash_name(name: &str) -> u32 {
        let mut hash: u32 = 0;
        for byte in name.bytes() {
            hash = hash
                .wrapping_mul(31)
                .wrapping_add(byte.to_ascii_uppercase() as u32);
        }
        hash
    }

    fn names_equal(a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    /// Check if the directory lock is held in any mode.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Number of entries currently in the directory.
    pub fn entry_count(&self) -> u32 {
        self.acquire_lock_shared();
        let count = self.table().count;
        self.release_lock(false);
        count
    }

    pub(crate) fn acquire_lock_shared(&self) {
        ke::enter_critical_region();
        self.lock.acquire_shared();
        trace::emit(trace::ObTraceEvent::DirectoryLockShared);
    }

    pub(crate) fn acquire_lock_exclusive(&self) {
        ke::enter_critical_region();
        self.lock.acquire_exclusive();
        trace::emit(trace::ObTraceEvent::DirectoryLockExclusive);
    }

    pub(crate) fn release_lock(&self, exclusive: bool) {
        if exclusive {
            self.lock.release_exclusive();
        } else {
            self.lock.release_shared();
        }
        trace::emit(trace::ObTraceEvent::DirectoryLockReleased);
        ke::leave_critical_region();
    }

    fn table(&self) -> &DirectoryTable {
        debug_assert!(self.lock.is_locked(), "directory table read without lock");
        // Safety: shared or exclusive holders only read through this path
        unsafe { &*self.table.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn table_mut(&self) -> &mut DirectoryTable {
        debug_assert!(
            self.lock.is_locked_exclusive(),
            "directory table written without exclusive lock"
        );
        // Safety: the exclusive holder is unique
        unsafe { &mut *self.table.get() }
    }

    /// Find an entry by name. The directory lock must be held.
    pub(crate) fn lookup_entry_locked(&self, name: &str) -> Option<Arc<Object>> {
        let hash = Self::hash_name(name);
        for entry in &self.table().entries {
            let object = match &entry.object {
                Some(object) => object,
                None => continue,
            };
            if entry.name_hash != hash {
                continue;
            }
            if let Some(entry_name) = object.name() {
                if Self::names_equal(&entry_name, name) {
                    return Some(Arc::clone(object));
                }
            }
        }
        None
    }

    /// Insert an object under a name. The directory lock must be held
    /// exclusively; `dir_object` is the object wrapping this directory.
    pub(crate) fn insert_entry_locked(
        &self,
        dir_object: &Arc<Object>,
        object: &Arc<Object>,
        name: &str,
    ) -> Result<(), ObError> {
        if let Some(body) = dir_object.as_directory() {
            debug_assert!(core::ptr::eq(body, self));
        }

        if self.lookup_entry_locked(name).is_some() {
            return Err(ObError::NameCollision);
        }

        let table = self.table_mut();
        let slot = table
            .entries
            .iter_mut()
            .find(|entry| entry.object.is_none())
            .ok_or(ObError::DirectoryFull)?;

        // Naming can still fail; the slot is untouched until it succeeds
        object.set_name_info(name, Some(dir_object))?;

        slot.object = Some(Arc::clone(object));
        slot.name_hash = Self::hash_name(name);
        table.count += 1;

        object.header().reference();
        object.header().set_flags(ObjectFlags::IN_NAMESPACE);
        Ok(())
    }

    /// Remove an entry by name, returning its object. The directory lock
    /// must be held exclusively.
    pub(crate) fn remove_entry_locked(&self, name: &str) -> Option<Arc<Object>> {
        let hash = Self::hash_name(name);
        let table = self.table_mut();
        for entry in &mut table.entries {
            let object = match &entry.object {
                Some(object) => object,
                None => continue,
            };
            if entry.name_hash != hash {
                continue;
            }
            let matches = object
                .name()
                .is_some_and(|entry_name| Self::names_equal(&entry_name, name));
            if matches {
                let object = entry.object.take();
                entry.name_hash = 0;
                table.count -= 1;
                return object;
            }
        }
        None
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

static DIRECTORY_TYPE: spin::Once<Arc<ObjectType>> = spin::Once::new();

/// The shared Directory object type.
pub fn directory_type() -> Arc<ObjectType> {
    Arc::clone(
        DIRECTORY_TYPE.call_once(|| ObjectType::new("Directory", ObjectTypeCallbacks::default())),
    )
}

/// Create a directory object, optionally named and linked into a parent.
pub fn create_directory_object(
    name: Option<&str>,
    parent: Option<&Arc<Object>>,
) -> Result<Arc<Object>, ObError> {
    let object = Object::new(directory_type(), ObjectBody::Directory(Directory::new()));
    match (name, parent) {
        (Some(name), Some(parent)) => {
            if let Err(error) = insert_object(parent, &object, name) {
                reference::dereference_object(object);
                return Err(error);
            }
        }
        (Some(name), None) => object.set_name_info(name, None)?,
        _ => {}
    }
    Ok(object)
}

/// Insert an object into a directory under a name.
///
/// Takes the directory lock exclusively through a lookup context. On
/// success the namespace holds one pointer reference and the initial
/// query reference on the object's name. Empty names never resolve and
/// are rejected.
pub fn insert_object(
    directory: &Arc<Object>,
    object: &Arc<Object>,
    name: &str,
) -> Result<(), ObError> {
    if name.is_empty() {
        return Err(ObError::NotFound);
    }

    let mut context = LookupContext::new();
    context.begin_lookup(directory, LookupIntent::Mutate)?;
    let result = match directory.as_directory() {
        Some(body) => body.insert_entry_locked(directory, object, name),
        None => {
            protocol_violation("insert target is not a directory");
            Err(ObError::NotFound)
        }
    };
    context.cleanup(false);
    result
}

/// Remove a named object from a directory.
///
/// Drops the namespace's query reference (which may fire the name
/// cleanup) and its pointer reference once the lock has been released.
pub fn remove_object(directory: &Arc<Object>, name: &str) -> Result<(), ObError> {
    let mut context = LookupContext::new();
    context.begin_lookup(directory, LookupIntent::Mutate)?;
    let removed = directory
        .as_directory()
        .and_then(|body| body.remove_entry_locked(name));
    context.cleanup(false);

    let object = match removed {
        Some(object) => object,
        None => return Err(ObError::NotFound),
    };
    object.header().clear_flags(ObjectFlags::IN_NAMESPACE);

    // Outside the lock: release the namespace holds taken at insertion
    if let Some(info) = object.name_info() {
        info.decrement_query_references();
    }
    reference::dereference_object(object);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ob::lookup::lookup_object;
    use crate::ob::reference::{dereference_object, drain_deferred_deletes};
    use core::sync::atomic::{AtomicU32, Ordering};

    fn test_object() -> Arc<Object> {
        static TEST_TYPE: spin::Once<Arc<ObjectType>> = spin::Once::new();
        let object_type =
            TEST_TYPE.call_once(|| ObjectType::new("Test", ObjectTypeCallbacks::default()));
        Object::new(Arc::clone(object_type), ObjectBody::Opaque(Box::new(0u64)))
    }

    #[test]
    fn test_insert_and_lookup() {
        let root = create_directory_object(None, None).unwrap();
        let object = test_object();

        insert_object(&root, &object, "MyEvent").unwrap();
        assert!(object.header().has_flags(ObjectFlags::IN_NAMESPACE));
        assert_eq!(root.as_directory().unwrap().entry_count(), 1);

        let found = lookup_object(&root, "MyEvent", LookupIntent::Read).unwrap();
        assert!(Arc::ptr_eq(&found, &object));
        dereference_object(found);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let root = create_directory_object(None, None).unwrap();
        let object = test_object();
        insert_object(&root, &object, "BaseNamedObjects").unwrap();

        let found = lookup_object(&root, "BASENAMEDOBJECTS", LookupIntent::Read).unwrap();
        assert!(Arc::ptr_eq(&found, &object));
        dereference_object(found);
    }

    #[test]
    fn test_name_collision() {
        let root = create_directory_object(None, None).unwrap();
        let first = test_object();
        let second = test_object();

        insert_object(&root, &first, "Shared").unwrap();
        assert_eq!(
            insert_object(&root, &second, "shared"),
            Err(ObError::NameCollision)
        );
        assert_eq!(root.as_directory().unwrap().entry_count(), 1);
    }

    #[test]
    fn test_directory_full() {
        let root = create_directory_object(None, None).unwrap();

        for index in 0..MAX_DIRECTORY_ENTRIES {
            let object = test_object();
            insert_object(&root, &object, &format!("Entry{}", index)).unwrap();
        }

        let overflow = test_object();
        assert_eq!(
            insert_object(&root, &overflow, "OneTooMany"),
            Err(ObError::DirectoryFull)
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let root = create_directory_object(None, None).unwrap();
        let object = test_object();
        assert_eq!(insert_object(&root, &object, ""), Err(ObError::NotFound));
    }

    #[test]
    fn test_remove_releases_name_and_parent() {
        static DELETES: AtomicU32 = AtomicU32::new(0);

        let counted_type = ObjectType::new(
            "Removable",
            ObjectTypeCallbacks {
                delete: Some(|_| {
                    DELETES.fetch_add(1, Ordering::SeqCst);
                }),
                ..Default::default()
            },
        );
        let root = create_directory_object(None, None).unwrap();
        let object = Object::new(Arc::clone(&counted_type), ObjectBody::Opaque(Box::new(())));

        insert_object(&root, &object, "Transient").unwrap();
        assert_eq!(root.header().pointer_count(), 2);

        remove_object(&root, "Transient").unwrap();
        assert!(matches!(
            lookup_object(&root, "Transient", LookupIntent::Read),
            Err(ObError::NotFound)
        ));
        assert_eq!(object.name(), None);
        assert!(!object.header().has_flags(ObjectFlags::IN_NAMESPACE));

        // Name cleanup returned the parent reference
        drain_deferred_deletes();
        assert_eq!(root.header().pointer_count(), 1);

        // Ours is the last object reference
        assert_eq!(object.header().pointer_count(), 1);
        dereference_object(object);
        assert_eq!(DELETES.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_missing_name() {
        let root = create_directory_object(None, None).unwrap();
        assert_eq!(remove_object(&root, "Ghost"), Err(ObError::NotFound));
    }

    #[test]
    fn test_nested_directories() {
        let root = create_directory_object(None, None).unwrap();
        let device = create_directory_object(Some("Device"), Some(&root)).unwrap();

        assert_eq!(device.name().as_deref(), Some("Device"));
        let found = lookup_object(&root, "Device", LookupIntent::Read).unwrap();
        assert!(Arc::ptr_eq(&found, &device));
        assert!(found.as_directory().is_some());
        dereference_object(found);
    }
}
