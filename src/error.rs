use std::fmt;

use rhai::{Dynamic, EvalAltResult, ParseError};
use thiserror::Error;

/// Failures surfaced by the engine API.
///
/// `InvalidArgument` and `Script` are synchronous failures returned to the
/// caller of the triggering operation. `EngineGone` is produced when a weak
/// engine reference fails to upgrade; on asynchronously fired timer thunks it
/// is swallowed internally, on live call paths it reaches the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("script engine is gone")]
    EngineGone,
}

impl EngineError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument(message.into())
    }
}

/// A compile or runtime fault raised inside evaluated script.
///
/// Carries the message, the source name the script was evaluated under, the
/// fault position when the engine reports one, and the script-level exception
/// value for faults raised by `throw`.
#[derive(Debug)]
pub struct ScriptError {
    message: String,
    source_name: String,
    line: Option<usize>,
    column: Option<usize>,
    exception: Option<Dynamic>,
}

impl ScriptError {
    pub(crate) fn from_parse(err: &ParseError, source_name: &str) -> Self {
        ScriptError {
            message: err.to_string(),
            source_name: source_name.to_string(),
            line: err.1.line(),
            column: err.1.position(),
            exception: None,
        }
    }

    pub(crate) fn from_eval(err: &EvalAltResult, source_name: &str) -> Self {
        let exception = match err {
            EvalAltResult::ErrorRuntime(value, _) => Some(value.clone()),
            _ => None,
        };
        let position = err.position();
        ScriptError {
            message: err.to_string(),
            source_name: source_name.to_string(),
            line: position.line(),
            column: position.position(),
            exception,
        }
    }

    /// The execution context was re-entered while an outer evaluation frame
    /// on the same thread was still running.
    pub(crate) fn context_busy() -> Self {
        ScriptError {
            message: "execution context is busy".to_string(),
            source_name: String::new(),
            line: None,
            column: None,
            exception: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn column(&self) -> Option<usize> {
        self.column
    }

    /// The script-level exception value, when the fault carried one.
    pub fn exception(&self) -> Option<&Dynamic> {
        self.exception.as_ref()
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.source_name.is_empty() {
            write!(f, "{}: ", self.source_name)?;
        }
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, "[{line}:{column}] ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptError {}
