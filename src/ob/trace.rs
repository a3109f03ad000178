//! Lookup and callout instrumentation
//!
//! The reference design traced directory-lock traffic and detected IRQL
//! drift across type callouts with compiled-in debug conditionals. Here
//! both are a single optional hook so either build configuration can be
//! observed from tests.

use std::sync::Arc;

use crate::ke::Irql;

/// Directory-lock and lookup-context events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObTraceEvent {
    /// A lookup context was initialized
    LookupInitialized,
    /// The directory lock was acquired shared
    DirectoryLockShared,
    /// The directory lock was acquired exclusive
    DirectoryLockExclusive,
    /// The directory lock was released
    DirectoryLockReleased,
    /// A lookup context was cleaned up
    LookupCleanedUp,
}

/// Observer for lock traffic and callout IRQL drift.
pub trait ObTraceHook: Send + Sync {
    /// Called on every lock and context transition.
    fn trace(&self, event: ObTraceEvent);

    /// Called when a type callout returns at a different IRQL than it was
    /// entered at.
    fn callout_irql_mismatch(
        &self,
        type_name: &str,
        procedure: &str,
        entered_at: Irql,
        returned_at: Irql,
    ) {
        let _ = (type_name, procedure, entered_at, returned_at);
    }
}

static TRACE_HOOK: spin::RwLock<Option<Arc<dyn ObTraceHook>>> = spin::RwLock::new(None);

/// Install or clear the trace hook.
pub fn set_trace_hook(hook: Option<Arc<dyn ObTraceHook>>) {
    *TRACE_HOOK.write() = hook;
}

pub(crate) fn emit(event: ObTraceEvent) {
    if let Some(hook) = TRACE_HOOK.read().as_ref() {
        hook.trace(event);
    }
}

pub(crate) fn callout_irql_mismatch(
    type_name: &str,
    procedure: &str,
    entered_at: Irql,
    returned_at: Irql,
) {
    log::error!(
        "ob: type {} procedure {} entered at {:?} but returned at {:?}",
        type_name,
        procedure,
        entered_at,
        returned_at
    );
    if let Some(hook) = TRACE_HOOK.read().as_ref() {
        hook.callout_irql_mismatch(type_name, procedure, entered_at, returned_at);
    }
}
