//! Typed errors for the engine. All of them are contract violations raised
//! at the point of violation; the engine never swallows one.

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Action name empty or not an identifier
    #[error("invalid action name: {name:?}")]
    InvalidAction { name: String },

    /// `set_state`/`replace_state`/initial state was not an object
    #[error("invalid delta: expected an object, got {found}")]
    InvalidDelta { found: &'static str },

    /// A reducer or middleware link yielded something other than an object
    #[error("{action} yielded {found} where an object was required")]
    InvalidReturn { action: String, found: &'static str },

    /// Binding without a reducer
    #[error("no reducer supplied for action {action}")]
    InvalidReducer { action: String },

    /// Negative history index or step count
    #[error("invalid history index: {index}")]
    InvalidIndex { index: i64 },

    /// Action invoked while a store it is bound to was reducing
    #[error("action {action} invoked while store {store} is reducing")]
    CircularInvocation { action: String, store: Uuid },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scheduler did not settle within {ticks} ticks")]
    Unsettled { ticks: usize },

    /// Failure raised by a user reducer
    #[error(transparent)]
    Reducer(#[from] anyhow::Error),
}

/// Closed set of error kinds callers can match on without caring about the
/// variant's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAction,
    InvalidDelta,
    InvalidReturn,
    InvalidReducer,
    InvalidIndex,
    CircularInvocation,
    Config,
    Unsettled,
    Reducer,
}

impl ErrorKind {
    pub const INVALID_ACTION: ErrorKind = ErrorKind::InvalidAction;
    pub const INVALID_DELTA: ErrorKind = ErrorKind::InvalidDelta;
    pub const INVALID_RETURN: ErrorKind = ErrorKind::InvalidReturn;
    pub const INVALID_REDUCER: ErrorKind = ErrorKind::InvalidReducer;
    pub const INVALID_INDEX: ErrorKind = ErrorKind::InvalidIndex;
    pub const CIRCULAR_INVOCATION: ErrorKind = ErrorKind::CircularInvocation;

    /// Stable string code.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidAction => "INVALID_ACTION",
            ErrorKind::InvalidDelta => "INVALID_DELTA",
            ErrorKind::InvalidReturn => "INVALID_RETURN",
            ErrorKind::InvalidReducer => "INVALID_REDUCER",
            ErrorKind::InvalidIndex => "INVALID_INDEX",
            ErrorKind::CircularInvocation => "CIRCULAR_INVOCATION",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Unsettled => "UNSETTLED",
            ErrorKind::Reducer => "REDUCER",
        }
    }
}

impl EngineError {
    /// The error's kind. A reducer failure that wraps an engine error (for
    /// example a circular invocation propagated with `?`) reports the inner
    /// kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidAction { .. } => ErrorKind::InvalidAction,
            EngineError::InvalidDelta { .. } => ErrorKind::InvalidDelta,
            EngineError::InvalidReturn { .. } => ErrorKind::InvalidReturn,
            EngineError::InvalidReducer { .. } => ErrorKind::InvalidReducer,
            EngineError::InvalidIndex { .. } => ErrorKind::InvalidIndex,
            EngineError::CircularInvocation { .. } => ErrorKind::CircularInvocation,
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::Unsettled { .. } => ErrorKind::Unsettled,
            EngineError::Reducer(err) => err
                .chain()
                .find_map(|cause| cause.downcast_ref::<EngineError>())
                .map(EngineError::kind)
                .unwrap_or(ErrorKind::Reducer),
        }
    }
}

/// Short type name of a JSON value, for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
