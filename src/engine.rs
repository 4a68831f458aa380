use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rhai::{Dynamic, Engine, Map, Scope};
use smallvec::SmallVec;

use crate::config::AppInfo;
use crate::context::{ContextGuard, ContextState, ExecLock};
use crate::error::{EngineError, ScriptError};
use crate::events::{EventCallback, EventDispatcher};
use crate::platform::{
    ConnectionAllowedCallback, DefaultFileSystem, DefaultLogSystem, DefaultWebRequest, FileSystem,
    LogLevel, LogSystem, WebRequest,
};
use crate::runtime::ScriptRuntime;
use crate::timers::{Timer, TimerTask, TimerTaskRegistry};
use crate::value::{make_trampoline, ValueHandle};

/// One scripting-engine instance: the execution context, the collaborator
/// set, the timer-task registry, and the named-event registry.
///
/// Shared-ownership object; hand out clones of the `Arc` freely. Script
/// execution is serialized by the execution lock behind [`ScriptEngine::enter`];
/// all other state lives behind short-lived bookkeeping locks that are never
/// held across user-supplied code.
pub struct ScriptEngine {
    interpreter: Engine,
    exec: ExecLock,
    timer: Arc<dyn Timer>,
    timer_tasks: Mutex<TimerTaskRegistry>,
    events: EventDispatcher,
    file_system: RwLock<Arc<dyn FileSystem>>,
    web_request: RwLock<Arc<dyn WebRequest>>,
    log_system: RwLock<Arc<dyn LogSystem>>,
    connection_allowed: Mutex<Option<ConnectionAllowedCallback>>,
}

/// Non-owning observer of an engine instance. The upgrade-or-fail check is
/// the liveness gate every trampolined callback and pending timer passes
/// through before touching the engine; it is also the only cancellation
/// mechanism pending timers have.
#[derive(Clone)]
pub struct EngineRef(Weak<ScriptEngine>);

impl EngineRef {
    pub fn upgrade(&self) -> Result<Arc<ScriptEngine>, EngineError> {
        self.0.upgrade().ok_or(EngineError::EngineGone)
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine").finish_non_exhaustive()
    }
}

impl ScriptEngine {
    /// Builds a Ready engine instance: fresh execution context, default
    /// collaborators, and the host's global surface installed exactly once
    /// via `install_globals(engine, app_info, global_object)`.
    pub fn create<F>(
        app_info: AppInfo,
        timer: Arc<dyn Timer>,
        runtime: &'static ScriptRuntime,
        install_globals: F,
    ) -> Result<Arc<Self>, EngineError>
    where
        F: FnOnce(&Arc<ScriptEngine>, &AppInfo, &ValueHandle) -> Result<(), EngineError>,
    {
        if runtime.is_closed() {
            return Err(EngineError::invalid_argument("script runtime has been shut down"));
        }
        let mut interpreter = Engine::new();
        runtime.configure(&mut interpreter);

        let engine = Arc::new(ScriptEngine {
            interpreter,
            exec: ExecLock::new(RefCell::new(ContextState::new())),
            timer,
            timer_tasks: Mutex::new(TimerTaskRegistry::default()),
            events: EventDispatcher::default(),
            file_system: RwLock::new(Arc::new(DefaultFileSystem::new())),
            web_request: RwLock::new(Arc::new(DefaultWebRequest)),
            log_system: RwLock::new(Arc::new(DefaultLogSystem)),
            connection_allowed: Mutex::new(None),
        });

        {
            let guard = engine.enter();
            let global = engine.global_object_view(&guard)?;
            install_globals(&engine, &app_info, &global)?;
        }
        Ok(engine)
    }

    /// Scoped, exclusive entry into this engine's execution context. Blocks
    /// while another thread holds the context; re-entrant on the owning
    /// thread.
    pub fn enter(&self) -> ContextGuard<'_> {
        ContextGuard::enter(&self.exec)
    }

    pub fn downgrade(engine: &Arc<ScriptEngine>) -> EngineRef {
        EngineRef(Arc::downgrade(engine))
    }

    pub(crate) fn interpreter(&self) -> &Engine {
        &self.interpreter
    }

    /// Compiles and executes `source`. `filename` is attached to the
    /// compiled chunk for diagnostic attribution only; pass `""` for
    /// anonymous chunks.
    ///
    /// Runs against a working copy of the global scope and commits globals
    /// and newly defined functions only on success, so a fault never leaves
    /// half-installed global state behind.
    pub fn evaluate(self: &Arc<Self>, source: &str, filename: &str) -> Result<ValueHandle, EngineError> {
        let guard = self.enter();
        let mut state = guard.state_mut()?;
        let mut ast = self
            .interpreter
            .compile_with_scope(&state.scope, source)
            .map_err(|err| EngineError::Script(ScriptError::from_parse(&err, filename)))?;
        if !filename.is_empty() {
            ast.set_source(filename);
        }
        let mut working = state.scope.clone();
        let value = self
            .interpreter
            .eval_ast_with_scope::<Dynamic>(&mut working, &ast)
            .map_err(|err| EngineError::Script(ScriptError::from_eval(&err, filename)))?;
        state.scope = working;
        state.lib = state.lib.merge(&ast.clone_functions_only());
        drop(state);
        Ok(ValueHandle::new(self.clone(), value))
    }

    pub fn new_string(self: &Arc<Self>, value: &str) -> ValueHandle {
        let _guard = self.enter();
        ValueHandle::new(self.clone(), value.into())
    }

    pub fn new_integer(self: &Arc<Self>, value: i64) -> ValueHandle {
        let _guard = self.enter();
        ValueHandle::new(self.clone(), Dynamic::from(value))
    }

    pub fn new_boolean(self: &Arc<Self>, value: bool) -> ValueHandle {
        let _guard = self.enter();
        ValueHandle::new(self.clone(), Dynamic::from(value))
    }

    pub fn new_unit(self: &Arc<Self>) -> ValueHandle {
        let _guard = self.enter();
        ValueHandle::new(self.clone(), Dynamic::UNIT)
    }

    /// Fresh shared object value; property writes through any handle alias
    /// every other handle to the same object.
    pub fn new_object(self: &Arc<Self>) -> ValueHandle {
        let _guard = self.enter();
        ValueHandle::new(self.clone(), Dynamic::from_map(Map::new()).into_shared())
    }

    /// Bridges native data into a script value through serde.
    pub fn new_value_of<T: serde::Serialize>(self: &Arc<Self>, value: &T) -> Result<ValueHandle, EngineError> {
        let _guard = self.enter();
        let dynamic = rhai::serde::to_dynamic(value)
            .map_err(|err| EngineError::invalid_argument(format!("value is not script-representable: {err}")))?;
        Ok(ValueHandle::new(self.clone(), dynamic))
    }

    /// Produces a script-callable function value bound to `callback`. The
    /// value holds only a weak back-reference to this engine and stays
    /// callable after the guard that created it has exited; invoking it once
    /// the engine is gone raises a well-defined script fault.
    pub fn new_callback<F>(self: &Arc<Self>, callback: F) -> Result<ValueHandle, EngineError>
    where
        F: Fn(&Arc<ScriptEngine>, &[ValueHandle]) -> Result<ValueHandle, EngineError> + Send + Sync + 'static,
    {
        let _guard = self.enter();
        let fn_ptr = make_trampoline(self, callback)?;
        Ok(ValueHandle::new(self.clone(), Dynamic::from(fn_ptr)))
    }

    /// Read view of the global bindings as an object value. Writes to
    /// globals go through [`ScriptEngine::set_global_property`].
    pub fn get_global_object(self: &Arc<Self>) -> Result<ValueHandle, EngineError> {
        let guard = self.enter();
        self.global_object_view(&guard)
    }

    fn global_object_view(self: &Arc<Self>, guard: &ContextGuard<'_>) -> Result<ValueHandle, EngineError> {
        let state = guard.state()?;
        let mut map = Map::new();
        for (name, _constant, value) in state.scope.iter() {
            map.insert(name.into(), value);
        }
        Ok(ValueHandle::new(self.clone(), Dynamic::from_map(map)))
    }

    pub fn set_global_property(&self, name: &str, value: &ValueHandle) -> Result<(), EngineError> {
        let guard = self.enter();
        let mut state = guard.state_mut()?;
        let shadows_constant = state
            .scope
            .iter()
            .filter(|(binding, _, _)| *binding == name)
            .last()
            .map_or(false, |(_, constant, _)| constant);
        if shadows_constant {
            return Err(EngineError::invalid_argument(format!("global '{name}' is a constant")));
        }
        state.scope.set_value(name, value.to_dynamic());
        Ok(())
    }

    /// Cooperative cleanup: repeatedly sweeps shadowed global bindings until
    /// a pass frees nothing. Deterministic teardown aid, not steady-state
    /// maintenance.
    pub fn gc(&self) {
        let guard = self.enter();
        let Ok(mut state) = guard.state_mut() else { return };
        loop {
            if sweep_shadowed_globals(&mut state.scope) == 0 {
                break;
            }
        }
    }

    /// Registers a deferred callback invocation. `args[0]` must be callable
    /// and `args[1]` is the delay in milliseconds; everything after travels
    /// to the callback when the timer elapses. The pending task keeps no
    /// strong reference back to this engine; destroying the engine is the
    /// one way to cancel it.
    pub fn schedule_timer(self: &Arc<Self>, args: &[ValueHandle]) -> Result<(), EngineError> {
        if args.len() < 2 {
            return Err(EngineError::invalid_argument("schedule_timer requires at least 2 arguments"));
        }
        if !args[0].is_function() {
            return Err(EngineError::invalid_argument(
                "first argument to schedule_timer must be callable",
            ));
        }
        let delay = timer_delay(&args[1])?;
        let token = {
            let mut registry = self.timer_tasks.lock();
            registry.insert(TimerTask { arguments: args.iter().map(ValueHandle::to_dynamic).collect() })
        };
        let engine_ref = ScriptEngine::downgrade(self);
        self.timer.register_delayed_callback(
            delay,
            Box::new(move || {
                // A failed upgrade means the engine died first; the task died
                // with it and the thunk fizzles silently.
                if let Ok(engine) = engine_ref.upgrade() {
                    engine.run_timer_task(token);
                }
            }),
        );
        Ok(())
    }

    pub fn pending_timer_tasks(&self) -> usize {
        self.timer_tasks.lock().len()
    }

    fn run_timer_task(self: &Arc<Self>, token: u64) {
        let _guard = self.enter();
        let Some(task) = self.timer_tasks.lock().take(token) else {
            return;
        };
        let mut arguments = task.arguments.into_iter();
        let Some(callback) = arguments.next() else { return };
        let _delay = arguments.next();
        let callback = ValueHandle::new(self.clone(), callback);
        let call_args: SmallVec<[ValueHandle; 4]> =
            arguments.map(|value| ValueHandle::new(self.clone(), value)).collect();
        // The task is already out of the registry; a fault here is reported
        // to the log sink, the only observer left on this path.
        if let Err(err) = callback.call(&call_args) {
            self.log(LogLevel::Error, &format!("timer callback failed: {err}"), "");
        }
    }

    pub fn set_event_callback(&self, name: &str, callback: Option<EventCallback>) {
        self.events.set(name, callback);
    }

    pub fn remove_event_callback(&self, name: &str) {
        self.events.remove(name);
    }

    /// Invokes the callback registered for `name` outside the registry lock;
    /// no-op when nothing is registered.
    pub fn trigger_event(&self, name: &str, args: &[ValueHandle]) {
        self.events.trigger(name, args);
    }

    pub fn set_file_system(&self, file_system: Option<Arc<dyn FileSystem>>) -> Result<(), EngineError> {
        let file_system =
            file_system.ok_or_else(|| EngineError::invalid_argument("FileSystem cannot be null"))?;
        *self.file_system.write() = file_system;
        Ok(())
    }

    pub fn file_system(&self) -> Arc<dyn FileSystem> {
        self.file_system.read().clone()
    }

    pub fn set_web_request(&self, web_request: Option<Arc<dyn WebRequest>>) -> Result<(), EngineError> {
        let web_request =
            web_request.ok_or_else(|| EngineError::invalid_argument("WebRequest cannot be null"))?;
        *self.web_request.write() = web_request;
        Ok(())
    }

    pub fn web_request(&self) -> Arc<dyn WebRequest> {
        self.web_request.read().clone()
    }

    pub fn set_log_system(&self, log_system: Option<Arc<dyn LogSystem>>) -> Result<(), EngineError> {
        let log_system =
            log_system.ok_or_else(|| EngineError::invalid_argument("LogSystem cannot be null"))?;
        *self.log_system.write() = log_system;
        Ok(())
    }

    pub fn log_system(&self) -> Arc<dyn LogSystem> {
        self.log_system.read().clone()
    }

    pub fn set_is_connection_allowed_callback(&self, callback: Option<ConnectionAllowedCallback>) {
        *self.connection_allowed.lock() = callback;
    }

    /// The permission predicate can be expensive, so it is copied out under
    /// its own lock and invoked unlocked; only the asking thread blocks on
    /// it. No predicate means "allowed".
    pub fn is_connection_allowed(&self) -> bool {
        let callback = { self.connection_allowed.lock().clone() };
        callback.map_or(true, |callback| callback())
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str, source: &str) {
        let sink = { self.log_system.read().clone() };
        sink.log(level, message, source);
    }
}

fn timer_delay(value: &ValueHandle) -> Result<Duration, EngineError> {
    let dynamic = value.as_dynamic();
    if let Ok(ms) = dynamic.as_int() {
        return Ok(Duration::from_millis(ms.max(0) as u64));
    }
    if let Ok(ms) = dynamic.as_float() {
        if ms.is_finite() {
            return Ok(Duration::from_millis(ms.max(0.0) as u64));
        }
    }
    Err(EngineError::invalid_argument("timer delay must be a millisecond count"))
}

fn sweep_shadowed_globals(scope: &mut Scope<'static>) -> usize {
    let entries: Vec<(String, bool, Dynamic)> =
        scope.iter().map(|(name, constant, value)| (name.to_string(), constant, value)).collect();
    let mut last_binding: HashMap<&str, usize> = HashMap::new();
    for (index, (name, _, _)) in entries.iter().enumerate() {
        last_binding.insert(name.as_str(), index);
    }
    let removed = entries.len() - last_binding.len();
    if removed > 0 {
        let mut compacted = Scope::new();
        for (index, (name, constant, value)) in entries.iter().enumerate() {
            if last_binding.get(name.as_str()) == Some(&index) {
                if *constant {
                    compacted.push_constant_dynamic(name.clone(), value.clone());
                } else {
                    compacted.push_dynamic(name.clone(), value.clone());
                }
            }
        }
        *scope = compacted;
    }
    removed
}
