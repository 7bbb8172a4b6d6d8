//! Error types.
//!
//! Each concern has its own error enum. Structural errors (unknown signals,
//! derived writes, immutability violations) are returned to the caller;
//! pipeline failures are only ever logged by the dispatcher, so
//! [`PipelineError`] exists mostly to give those log lines a shape.

use thiserror::Error;

/// Boxed error returned by action handlers and side effects.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the signal store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// A signal with this name already exists.
    #[error("signal '{0}' already exists")]
    DuplicateSignal(String),

    /// No signal with this name exists.
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    /// Derived signals are read-only.
    #[error("signal '{0}' is derived and cannot be written directly")]
    DerivedWrite(String),
}

/// Errors raised by a state proxy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A nested property was assigned while the proxy is immutable.
    #[error("cannot modify '{path}': state is immutable below the root")]
    ImmutabilityViolation { path: String },

    /// A validator rejected the write and the proxy runs in strict mode.
    #[error("validation failed for '{path}': {message}")]
    ValidationRejected { path: String, message: String },

    /// The path string could not be parsed.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// An intermediate segment of the path does not exist or is not a container.
    #[error("path '{0}' does not resolve to a writable location")]
    PathNotFound(String),

    /// Computed and selector keys are read-only.
    #[error("'{0}' is a computed key and cannot be written")]
    ReadOnlyKey(String),

    /// Proxy state must be an object at the root.
    #[error("state root must be an object, got {0}")]
    InvalidRoot(&'static str),

    /// Taking or restoring a snapshot failed.
    #[error("snapshot failed: {0}")]
    Snapshot(String),
}

/// Failures inside an action pipeline. Logged, never propagated.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("handler for '{action}' failed: {source}")]
    Handler {
        action: String,
        #[source]
        source: BoxError,
    },

    #[error("side effect #{index} for '{action}' failed: {source}")]
    SideEffect {
        action: String,
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("{stage} for '{action}' panicked")]
    Panicked { action: String, stage: &'static str },
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid MessagePack config: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),
}

/// Errors raised while building a host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// No tokio runtime is running on this thread.
    #[error("no tokio runtime is running on this thread")]
    NoRuntime,

    /// Microtasks would run in parallel with the tick that queued them.
    #[error("tokio host needs a current-thread runtime, got {0}")]
    UnsupportedRuntime(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Result alias defaulting to the crate error.
pub type Result<T, E = Error> = std::result::Result<T, E>;
