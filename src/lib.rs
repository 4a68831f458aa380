//! Host-integration layer that embeds the `rhai` scripting engine inside a
//! native filtering application: engine-instance lifecycle, scoped
//! execution-context entry, deferred timer callbacks, named-event dispatch,
//! and the weak-reference scheme that lets script-visible native callbacks
//! recover their owning engine safely.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod platform;
pub mod runtime;
pub mod timers;
pub mod value;

pub use config::AppInfo;
pub use context::ContextGuard;
pub use engine::{EngineRef, ScriptEngine};
pub use error::{EngineError, ScriptError};
pub use events::EventCallback;
pub use platform::{
    ConnectionAllowedCallback, DefaultFileSystem, DefaultLogSystem, DefaultWebRequest, FileStat,
    FileSystem, LogLevel, LogSystem, RequestStatus, ServerResponse, WebRequest,
};
pub use timers::{create_default_timer, DefaultTimer, Timer, TimerThunk};
pub use value::ValueHandle;
