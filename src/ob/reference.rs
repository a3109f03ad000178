//! Object Reference Counting
//!
//! Objects live as long as their pointer count. The last dereference runs
//! the type's delete callout — unless the caller is in a context that
//! cannot tolerate synchronous destruction (inside a critical region, on
//! a name-cleanup path), in which case the object is flagged and parked on
//! the deferred-delete queue until a waitable context drains it.

use std::sync::Arc;

use super::header::{Object, ObjectFlags};
use crate::ke::{self, Irql};

static DEFERRED_DELETE_QUEUE: spin::Mutex<Vec<Arc<Object>>> = spin::Mutex::new(Vec::new());

/// Take one pointer reference on an object.
pub fn reference_object(object: &Arc<Object>) {
    object.header().reference();
}

/// Release one pointer reference, destroying the object if it was the
/// last and the object is not permanent.
pub fn dereference_object(object: Arc<Object>) {
    if object.header().dereference() {
        delete_object(object);
    }
}

/// Release one pointer reference without ever destroying synchronously.
///
/// If this was the last reference the object is flagged `DEFER_DELETE`
/// (failing further query-reference increments) and queued; destruction
/// happens when [`drain_deferred_deletes`] runs from a waitable context.
pub fn dereference_object_defer_delete(object: Arc<Object>) {
    if object.header().dereference() {
        object.header().set_flags(ObjectFlags::DEFER_DELETE);
        log::debug!(
            "ob: deferring delete of {} object",
            object.object_type().name()
        );
        DEFERRED_DELETE_QUEUE.lock().push(object);
    }
}

/// Destroy every object parked on the deferred-delete queue.
///
/// Must run from a waitable context. Returns the number of objects
/// destroyed.
pub fn drain_deferred_deletes() -> usize {
    debug_assert!(
        ke::current_irql() <= Irql::Apc,
        "deferred deletes drained above APC_LEVEL"
    );

    let mut destroyed = 0;
    loop {
        // Never hold the queue lock across a delete callout
        let object = DEFERRED_DELETE_QUEUE.lock().pop();
        match object {
            Some(object) => {
                delete_object(object);
                destroyed += 1;
            }
            None => return destroyed,
        }
    }
}

fn delete_object(object: Arc<Object>) {
    if object.header().has_flags(ObjectFlags::PERMANENT) {
        return;
    }
    object.object_type().invoke_delete(&object);
}
