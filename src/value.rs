use std::fmt;
use std::sync::Arc;

use rhai::{Dynamic, EvalAltResult, FnPtr, Map, NativeCallContext, Position};
use smallvec::SmallVec;

use crate::engine::ScriptEngine;
use crate::error::{EngineError, ScriptError};

/// A script value paired with a strong reference to its owning engine, so the
/// engine outlives anything derived from it. Handles are only constructed
/// while a [`crate::context::ContextGuard`] for that engine is active.
#[derive(Clone)]
pub struct ValueHandle {
    engine: Arc<ScriptEngine>,
    value: Dynamic,
}

impl ValueHandle {
    pub(crate) fn new(engine: Arc<ScriptEngine>, value: Dynamic) -> Self {
        ValueHandle { engine, value }
    }

    /// The engine this value belongs to.
    pub fn engine(&self) -> &Arc<ScriptEngine> {
        &self.engine
    }

    pub(crate) fn as_dynamic(&self) -> &Dynamic {
        &self.value
    }

    pub(crate) fn to_dynamic(&self) -> Dynamic {
        self.value.clone()
    }

    pub(crate) fn into_dynamic(self) -> Dynamic {
        self.value
    }

    pub fn is_unit(&self) -> bool {
        self.value.is_unit()
    }

    pub fn is_string(&self) -> bool {
        self.value.is_string()
    }

    pub fn is_integer(&self) -> bool {
        self.value.is_int()
    }

    pub fn is_boolean(&self) -> bool {
        self.value.is_bool()
    }

    pub fn is_object(&self) -> bool {
        self.value.is_map()
    }

    pub fn is_function(&self) -> bool {
        self.value.is::<FnPtr>()
    }

    pub fn as_string(&self) -> Option<String> {
        self.value.clone().into_string().ok()
    }

    pub fn as_integer(&self) -> Option<i64> {
        self.value.as_int().ok()
    }

    pub fn as_boolean(&self) -> Option<bool> {
        self.value.as_bool().ok()
    }

    /// Reads a property of an object value. `None` for absent keys and for
    /// non-object values alike.
    pub fn get_property(&self, name: &str) -> Option<ValueHandle> {
        let _guard = self.engine.enter();
        let map = self.value.read_lock::<Map>()?;
        map.get(name).map(|value| ValueHandle::new(self.engine.clone(), value.clone()))
    }

    /// Writes a property of an object value. Writes through shared objects,
    /// so every handle cloned from the same object observes the update.
    pub fn set_property(&mut self, name: &str, value: &ValueHandle) -> Result<(), EngineError> {
        let _guard = self.engine.enter();
        let mut map = self
            .value
            .write_lock::<Map>()
            .ok_or_else(|| EngineError::invalid_argument("value is not an object"))?;
        map.insert(name.into(), value.to_dynamic());
        Ok(())
    }

    /// Invokes a function value with the given arguments, entering the
    /// engine's context for the duration of the call.
    pub fn call(&self, args: &[ValueHandle]) -> Result<ValueHandle, EngineError> {
        let fn_ptr = self
            .value
            .clone()
            .try_cast::<FnPtr>()
            .ok_or_else(|| EngineError::invalid_argument("value is not callable"))?;
        let guard = self.engine.enter();
        let lib = guard.state()?.lib.clone();
        let call_args: Vec<Dynamic> = args.iter().map(ValueHandle::to_dynamic).collect();
        let result = fn_ptr
            .call::<Dynamic>(self.engine.interpreter(), &lib, call_args)
            .map_err(|err| EngineError::Script(ScriptError::from_eval(&err, "")))?;
        Ok(ValueHandle::new(self.engine.clone(), result))
    }

    /// JSON view of the value, for host consumption and diagnostics.
    pub fn to_json(&self) -> Result<serde_json::Value, EngineError> {
        rhai::serde::from_dynamic(&self.value)
            .map_err(|err| EngineError::invalid_argument(format!("value is not representable as JSON: {err}")))
    }
}

impl fmt::Display for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl fmt::Debug for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueHandle({:?})", self.value)
    }
}

/// Builds the script-callable trampoline for a native callback.
///
/// The returned function value closes over a weak back-reference to the
/// engine; invoking it after the engine is gone raises a well-defined script
/// fault instead of touching freed state. On a live engine, the call's
/// arguments are marshaled into `ValueHandle`s (each carrying its own strong
/// back-reference) before the bound native logic runs.
pub(crate) fn make_trampoline<F>(engine: &Arc<ScriptEngine>, callback: F) -> Result<FnPtr, EngineError>
where
    F: Fn(&Arc<ScriptEngine>, &[ValueHandle]) -> Result<ValueHandle, EngineError> + Send + Sync + 'static,
{
    let weak = ScriptEngine::downgrade(engine);
    FnPtr::from_dyn_fn(
        "native_callback",
        Box::new(move |_ctx: NativeCallContext, args: &mut [&mut Dynamic]| {
            let engine = weak.upgrade().map_err(script_fault)?;
            let handles: SmallVec<[ValueHandle; 4]> = args
                .iter()
                .map(|arg| ValueHandle::new(engine.clone(), (**arg).clone()))
                .collect();
            match callback(&engine, &handles) {
                Ok(result) => Ok(result.into_dynamic()),
                Err(err) => Err(script_fault(err)),
            }
        }),
    )
    .map_err(|err| EngineError::invalid_argument(format!("callback was rejected: {err}")))
}

fn script_fault(err: EngineError) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(err.to_string()), Position::NONE))
}
