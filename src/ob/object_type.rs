//! Object Type Implementation
//!
//! Each object type carries a name, a live object count, and the callouts
//! the manager invokes on its behalf. Any callout that touches type-wide
//! metadata runs under the type's serialization mutex so at most one such
//! callout per type is in flight.
//!
//! # NT Semantics
//!
//! - The mutex is waitable: it may only be entered at or below APC_LEVEL
//! - Entry brackets a critical region around the exclusive resource;
//!   leaving is the mirror image
//! - Callouts must not re-enter the mutex for their own type
//! - A callout returning at a different IRQL than it was entered at is a
//!   contract violation, surfaced through the trace hook

use std::sync::Arc;

use core::sync::atomic::{AtomicU32, Ordering};

use super::header::Object;
use super::trace;
use crate::ex::EResource;
use crate::ke::{self, Irql};

/// Called when an object of this type has been constructed.
pub type CreateProcedure = fn(&Object);

/// Called when an object of this type is being destroyed.
pub type DeleteProcedure = fn(&Object);

/// Per-type callout table.
#[derive(Default)]
pub struct ObjectTypeCallbacks {
    /// Construction hook, run under the type mutex
    pub create: Option<CreateProcedure>,
    /// Destruction hook, run under the type mutex
    pub delete: Option<DeleteProcedure>,
}

/// Type descriptor shared by all objects of one type.
pub struct ObjectType {
    name: String,
    /// Serializes type-wide callouts
    mutex: EResource,
    /// Live objects of this type
    total_objects: AtomicU32,
    callbacks: ObjectTypeCallbacks,
}

impl ObjectType {
    /// Create a type descriptor.
    pub fn new(name: &str, callbacks: ObjectTypeCallbacks) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            mutex: EResource::new(),
            total_objects: AtomicU32::new(0),
            callbacks,
        })
    }

    /// The type's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live objects of this type.
    #[inline]
    pub fn object_count(&self) -> u32 {
        self.total_objects.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_object_count(&self) {
        self.total_objects.fetch_add(1, Ordering::Relaxed);
    }

    /// Enter the type-wide serialization mutex.
    ///
    /// Legal only from a waitable context; the caller must pair this with
    /// [`leave_mutex`](Self::leave_mutex).
    pub fn enter_mutex(&self) {
        debug_assert!(
            ke::current_irql() <= Irql::Apc,
            "type mutex entered above APC_LEVEL"
        );
        ke::enter_critical_region();
        self.mutex.acquire_exclusive(true);
    }

    /// Leave the type-wide serialization mutex.
    pub fn leave_mutex(&self) {
        self.mutex.release();
        ke::leave_critical_region();
        debug_assert!(ke::current_irql() <= Irql::Apc);
    }

    /// Check whether the current context holds the type mutex.
    pub fn mutex_held_by_current_thread(&self) -> bool {
        self.mutex.is_owned_by_current_thread()
    }

    /// Run the type's create callout for a newly constructed object.
    ///
    /// The callout runs under the type mutex, bracketed by an IRQL
    /// consistency check.
    pub(crate) fn invoke_create(&self, object: &Object) {
        if let Some(create) = self.callbacks.create {
            self.enter_mutex();
            let callout = CalloutGuard::start();
            create(object);
            callout.end(&self.name, "create");
            self.leave_mutex();
        }
    }

    /// Run the type's delete callout for a dying object.
    ///
    /// The callout runs under the type mutex, bracketed by an IRQL
    /// consistency check.
    pub(crate) fn invoke_delete(&self, object: &Object) {
        if let Some(delete) = self.callbacks.delete {
            self.enter_mutex();
            let callout = CalloutGuard::start();
            delete(object);
            callout.end(&self.name, "delete");
            self.leave_mutex();
        }
        self.total_objects.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Records the IRQL around a type callout and reports drift.
struct CalloutGuard {
    entered_at: Irql,
}

impl CalloutGuard {
    fn start() -> Self {
        Self {
            entered_at: ke::current_irql(),
        }
    }

    fn end(self, type_name: &str, procedure: &str) {
        let returned_at = ke::current_irql();
        if returned_at != self.entered_at {
            trace::callout_irql_mismatch(type_name, procedure, self.entered_at, returned_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ob::header::ObjectBody;
    use crate::ob::reference;
    use crate::ob::trace::{set_trace_hook, ObTraceEvent, ObTraceHook};
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_object_count_tracks_lifetime() {
        let object_type = ObjectType::new("Counted", ObjectTypeCallbacks::default());
        assert_eq!(object_type.object_count(), 0);

        let object = Object::new(Arc::clone(&object_type), ObjectBody::Opaque(Box::new(1u8)));
        assert_eq!(object_type.object_count(), 1);

        reference::dereference_object(object);
        assert_eq!(object_type.object_count(), 0);
    }

    #[test]
    fn test_mutex_serializes() {
        let object_type = ObjectType::new("Gate", ObjectTypeCallbacks::default());

        object_type.enter_mutex();
        assert!(object_type.mutex_held_by_current_thread());
        assert!(ke::in_critical_region());

        let contender = {
            let object_type = Arc::clone(&object_type);
            std::thread::spawn(move || object_type.mutex.try_acquire_exclusive())
        };
        assert!(!contender.join().unwrap());

        object_type.leave_mutex();
        assert!(!object_type.mutex_held_by_current_thread());
        assert!(!ke::in_critical_region());
    }

    #[test]
    fn test_delete_runs_under_mutex() {
        static UNDER_MUTEX: AtomicBool = AtomicBool::new(false);

        fn check_delete(object: &Object) {
            UNDER_MUTEX.store(
                object.object_type().mutex_held_by_current_thread(),
                Ordering::SeqCst,
            );
        }

        let object_type = ObjectType::new(
            "Checked",
            ObjectTypeCallbacks {
                delete: Some(check_delete),
                ..Default::default()
            },
        );
        let object = Object::new(Arc::clone(&object_type), ObjectBody::Opaque(Box::new(())));
        reference::dereference_object(object);

        assert!(UNDER_MUTEX.load(Ordering::SeqCst));
        assert!(!object_type.mutex_held_by_current_thread());
    }

    #[test]
    fn test_create_runs_under_mutex() {
        static UNDER_MUTEX: AtomicBool = AtomicBool::new(false);

        fn check_create(object: &Object) {
            UNDER_MUTEX.store(
                object.object_type().mutex_held_by_current_thread(),
                Ordering::SeqCst,
            );
        }

        let object_type = ObjectType::new(
            "Fresh",
            ObjectTypeCallbacks {
                create: Some(check_create),
                ..Default::default()
            },
        );
        let object = Object::new(Arc::clone(&object_type), ObjectBody::Opaque(Box::new(())));

        assert!(UNDER_MUTEX.load(Ordering::SeqCst));
        assert!(!object_type.mutex_held_by_current_thread());
        assert_eq!(object_type.object_count(), 1);
        reference::dereference_object(object);
    }

    #[test]
    fn test_callout_irql_mismatch_reported() {
        struct Recorder {
            mismatch: AtomicBool,
        }
        impl ObTraceHook for Recorder {
            fn trace(&self, _event: ObTraceEvent) {}
            fn callout_irql_mismatch(
                &self,
                type_name: &str,
                procedure: &str,
                entered_at: Irql,
                returned_at: Irql,
            ) {
                assert_eq!(type_name, "Drifty");
                assert_eq!(procedure, "delete");
                assert_eq!(entered_at, Irql::Passive);
                assert_eq!(returned_at, Irql::Apc);
                self.mismatch.store(true, Ordering::SeqCst);
            }
        }

        let recorder = Arc::new(Recorder {
            mismatch: AtomicBool::new(false),
        });
        set_trace_hook(Some(recorder.clone()));

        fn drifting_delete(_object: &Object) {
            // Forgets to lower IRQL before returning
            ke::raise_irql(Irql::Apc);
        }

        let object_type = ObjectType::new(
            "Drifty",
            ObjectTypeCallbacks {
                delete: Some(drifting_delete),
                ..Default::default()
            },
        );
        let object = Object::new(Arc::clone(&object_type), ObjectBody::Opaque(Box::new(())));
        reference::dereference_object(object);

        set_trace_hook(None);
        assert!(recorder.mismatch.load(Ordering::SeqCst));
        ke::lower_irql(Irql::Passive);
    }
}
