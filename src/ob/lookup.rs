//! Directory Lookup Protocol
//!
//! A [`LookupContext`] coordinates one namespace resolution: it takes the
//! directory lock in the intended mode, resolves a name to a candidate,
//! takes a query reference on the candidate's name while still under the
//! lock, and guarantees that the lock and the query reference are released
//! exactly once on every exit path.
//!
//! # State machine
//!
//! `Initialized → Locked(shared|exclusive) → Released`
//!
//! Cleanup is the single teardown point. It is idempotent once the
//! context is released; dropping a live context cleans it up without
//! keeping the caller's object reference, so a scope exit on an error
//! path cannot leak a lock or a query reference.
//!
//! # Usage
//! ```
//! use objmgr::ob::{self, LookupContext, LookupIntent};
//!
//! let root = ob::create_directory_object(None, None).unwrap();
//! let mut context = LookupContext::new();
//! context.begin_lookup(&root, LookupIntent::Read).unwrap();
//! let result = context.lookup("MissingName");
//! context.cleanup(false);
//! assert!(result.is_err());
//! ```

use std::sync::Arc;

use super::header::Object;
use super::{protocol_violation, reference, trace, ObError};

/// Whether the caller intends to mutate the directory's entry set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupIntent {
    /// Pure read: the directory lock is taken shared
    Read,
    /// Structural change: the directory lock is taken exclusive
    Mutate,
}

/// Lock-state signature for internal consistency checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Initialized,
    LockedShared,
    LockedExclusive,
    Released,
}

/// Per-operation state for one namespace resolution.
pub struct LookupContext {
    /// Candidate found so far; holds a query reference and one pointer
    /// reference taken on its behalf
    object: Option<Arc<Object>>,
    /// Directory whose lock this context holds
    directory: Option<Arc<Object>>,
    directory_locked: bool,
    state: LockState,
}

impl LookupContext {
    /// Initialize a null context.
    pub fn new() -> Self {
        trace::emit(trace::ObTraceEvent::LookupInitialized);
        Self {
            object: None,
            directory: None,
            directory_locked: false,
            state: LockState::Initialized,
        }
    }

    /// Acquire the directory lock in the intended mode.
    ///
    /// Fails with `NotFound` when the target is not a directory. A second
    /// begin on a live context is a protocol violation; the guard leaves
    /// the context untouched.
    pub fn begin_lookup(
        &mut self,
        directory: &Arc<Object>,
        intent: LookupIntent,
    ) -> Result<(), ObError> {
        if self.directory_locked {
            protocol_violation("begin_lookup on a context already holding a lock");
            return Err(ObError::NotFound);
        }
        let body = match directory.as_directory() {
            Some(body) => body,
            None => return Err(ObError::NotFound),
        };

        match intent {
            LookupIntent::Read => {
                body.acquire_lock_shared();
                self.state = LockState::LockedShared;
            }
            LookupIntent::Mutate => {
                body.acquire_lock_exclusive();
                self.state = LockState::LockedExclusive;
            }
        }
        self.directory = Some(Arc::clone(directory));
        self.directory_locked = true;
        Ok(())
    }

    /// Resolve a name in the locked directory.
    ///
    /// On a hit, takes a query reference on the candidate's name and one
    /// pointer reference for the caller, and records the candidate on the
    /// context. A previously recorded candidate is released first.
    pub fn lookup(&mut self, name: &str) -> Result<Arc<Object>, ObError> {
        if !self.directory_locked {
            protocol_violation("lookup without a locked directory");
            return Err(ObError::NotFound);
        }
        let body = self
            .directory
            .as_ref()
            .and_then(|directory| directory.as_directory())
            .ok_or(ObError::NotFound)?;

        let found = body.lookup_entry_locked(name).ok_or(ObError::NotFound)?;
        found.try_increment_query_references()?;
        reference::reference_object(&found);

        self.release_candidate(false);
        self.object = Some(Arc::clone(&found));
        Ok(found)
    }

    /// The candidate recorded by the last successful [`lookup`](Self::lookup).
    pub fn object(&self) -> Option<&Arc<Object>> {
        self.object.as_ref()
    }

    /// Tear the context down.
    ///
    /// Releases the directory lock if held, then drops the candidate's
    /// query reference; with `keep_reference` unset the caller's pointer
    /// reference is dropped too. Calling this on an already-released
    /// context is a no-op.
    pub fn cleanup(&mut self, keep_reference: bool) {
        if self.state == LockState::Released {
            return;
        }

        if self.directory_locked {
            let exclusive = self.state == LockState::LockedExclusive;
            if let Some(body) = self
                .directory
                .as_ref()
                .and_then(|directory| directory.as_directory())
            {
                body.release_lock(exclusive);
            }
            self.directory_locked = false;
        }
        self.directory = None;

        self.release_candidate(keep_reference);
        self.state = LockState::Released;
        trace::emit(trace::ObTraceEvent::LookupCleanedUp);
    }

    fn release_candidate(&mut self, keep_reference: bool) {
        if let Some(object) = self.object.take() {
            if let Some(info) = object.name_info() {
                info.decrement_query_references();
            }
            if !keep_reference {
                reference::dereference_object(object);
            }
        }
    }
}

impl Default for LookupContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LookupContext {
    fn drop(&mut self) {
        if self.state != LockState::Released {
            self.cleanup(false);
        }
    }
}

/// Resolve a name within a directory.
///
/// On success the returned object carries one pointer reference for the
/// caller, to be dropped with [`reference::dereference_object`].
pub fn lookup_object(
    directory: &Arc<Object>,
    name: &str,
    intent: LookupIntent,
) -> Result<Arc<Object>, ObError> {
    let mut context = LookupContext::new();
    context.begin_lookup(directory, intent)?;
    let result = context.lookup(name);
    context.cleanup(result.is_ok());
    result
}

/// Resolve a multi-component path from a root directory.
///
/// Components are separated by `\` or `/`; empty components are skipped.
/// The returned object carries one pointer reference for the caller.
pub fn lookup_object_path(root: &Arc<Object>, path: &str) -> Result<Arc<Object>, ObError> {
    let mut current = Arc::clone(root);
    let mut holds_reference = false;

    for component in path.split(['\\', '/']).filter(|c| !c.is_empty()) {
        match lookup_object(&current, component, LookupIntent::Read) {
            Ok(next) => {
                let previous = core::mem::replace(&mut current, next);
                if holds_reference {
                    reference::dereference_object(previous);
                }
                holds_reference = true;
            }
            Err(error) => {
                if holds_reference {
                    reference::dereference_object(current);
                }
                return Err(error);
            }
        }
    }

    if !holds_reference {
        reference::reference_object(&current);
    }
    Ok(current)
}
