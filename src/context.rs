use std::cell::{Ref, RefCell, RefMut};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rhai::{Scope, AST};

use crate::error::{EngineError, ScriptError};

/// The mutable half of an execution context: the global scope scripts see
/// and the accumulated function library of everything evaluated so far.
pub(crate) struct ContextState {
    pub(crate) scope: Scope<'static>,
    pub(crate) lib: AST,
}

impl ContextState {
    pub(crate) fn new() -> Self {
        ContextState { scope: Scope::new(), lib: AST::empty() }
    }
}

pub(crate) type ExecLock = ReentrantMutex<RefCell<ContextState>>;

/// Scoped, exclusive entry into an engine's execution context.
///
/// Construction blocks until the engine's execution lock is available; the
/// lock is thread-reentrant, so callbacks dispatched while a guard is held
/// may re-enter engine operations on the same thread without deadlocking.
/// Every exit path, fault propagation included, releases the lock on drop.
///
/// Interpreter state nests through a `RefCell`: an operation that needs the
/// state while an outer evaluation frame on the same thread is mid-flight
/// observes a recoverable "context busy" script fault instead of undefined
/// behavior.
pub struct ContextGuard<'e> {
    slot: ReentrantMutexGuard<'e, RefCell<ContextState>>,
}

impl<'e> ContextGuard<'e> {
    pub(crate) fn enter(lock: &'e ExecLock) -> Self {
        ContextGuard { slot: lock.lock() }
    }

    pub(crate) fn state(&self) -> Result<Ref<'_, ContextState>, EngineError> {
        self.slot
            .try_borrow()
            .map_err(|_| EngineError::Script(ScriptError::context_busy()))
    }

    pub(crate) fn state_mut(&self) -> Result<RefMut<'_, ContextState>, EngineError> {
        self.slot
            .try_borrow_mut()
            .map_err(|_| EngineError::Script(ScriptError::context_busy()))
    }
}
