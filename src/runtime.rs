//! Process-wide, one-time setup shared by every engine instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use once_cell::sync::OnceCell;
use rhai::{Engine, Module, Shared, INT};

static RUNTIME: OnceCell<ScriptRuntime> = OnceCell::new();

/// The shared scripting runtime: a base module of host intrinsics registered
/// into every engine instance plus the limit profile applied to each new
/// interpreter. Initialized once per process, torn down once at process exit.
pub struct ScriptRuntime {
    base_module: Shared<Module>,
    epoch: Instant,
    closed: AtomicBool,
}

/// Idempotent, thread-safe runtime initialization. The first call builds the
/// process-wide state; later calls return the same handle.
pub fn init() -> &'static ScriptRuntime {
    RUNTIME.get_or_init(ScriptRuntime::bootstrap)
}

pub fn is_initialized() -> bool {
    RUNTIME.get().is_some()
}

/// Marks the runtime closed. Intended to be called exactly once, at process
/// exit; engine creation afterwards is rejected. Never called per-engine.
pub fn shutdown() {
    if let Some(runtime) = RUNTIME.get() {
        runtime.closed.store(true, Ordering::SeqCst);
    }
}

impl ScriptRuntime {
    fn bootstrap() -> Self {
        let epoch = Instant::now();
        let mut module = Module::new();
        module.set_native_fn("elapsed_millis", move || {
            Ok(epoch.elapsed().as_millis() as INT)
        });
        ScriptRuntime { base_module: Shared::new(module), epoch, closed: AtomicBool::new(false) }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Milliseconds since runtime initialization; also exposed to script as
    /// the `elapsed_millis` intrinsic.
    pub fn elapsed_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Applies the shared profile to a freshly built interpreter.
    pub(crate) fn configure(&self, engine: &mut Engine) {
        engine.set_fast_operators(true);
        engine.set_max_call_levels(64);
        engine.set_max_expr_depths(64, 64);
        engine.register_global_module(self.base_module.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn init_is_idempotent() {
        let first = init() as *const ScriptRuntime;
        let second = init() as *const ScriptRuntime;
        assert!(is_initialized());
        assert_eq!(first, second, "init must hand out the same runtime");
    }

    #[test]
    fn init_is_idempotent_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| init() as *const ScriptRuntime as usize))
            .collect();
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.join().expect("init thread"));
        }
        assert!(seen.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn elapsed_millis_is_monotonic() {
        let runtime = init();
        let a = runtime.elapsed_millis();
        let b = runtime.elapsed_millis();
        assert!(b >= a);
    }
}
