use std::{error, fmt, ops, sync::Arc};

/// A cheap-to-clone wrapper for any error produced inside a reactive
/// computation.
///
/// Errors returned from memo and task bodies are cached on the node and
/// handed back from every subsequent read until the node recomputes
/// successfully, so they have to be cloneable. Two wrapped errors compare
/// equal when they render to the same message, which is also what decides
/// whether an errored recomputation notifies subscribers.
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct Error(Arc<dyn error::Error + Send + Sync>);

impl Error {
    /// Wraps an arbitrary error.
    pub fn new(err: impl error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(err))
    }

    /// Creates an error from a plain message.
    pub fn msg(msg: impl fmt::Display) -> Self {
        Self(Arc::new(MessageError(msg.to_string())))
    }

    /// Converts the wrapper into the inner reference-counted error.
    pub fn into_inner(self) -> Arc<dyn error::Error + Send + Sync> {
        self.0
    }
}

impl ops::Deref for Error {
    type Target = Arc<dyn error::Error + Send + Sync>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.to_string() == other.0.to_string()
    }
}

impl<T> From<T> for Error
where
    T: error::Error + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl error::Error for MessageError {}

/// Everything that can go wrong at the boundary of the reactive runtime.
///
/// Validation and graph errors are returned synchronously from the `try_*`
/// accessor that triggered them; computation errors carry the cached user
/// error of a failed memo or task body.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ReactiveError {
    /// A node was read while its own computation was running.
    #[error("circular dependency detected while evaluating a reactive node")]
    CircularDependency,

    /// The node behind this handle has been disposed.
    #[error("tried to access a reactive node that has been disposed")]
    NodeDisposed,

    /// A written value was rejected by the cell's guard predicate.
    #[error("value rejected by the signal's guard")]
    InvalidValue,

    /// A value was demanded from a node that has not produced one yet.
    #[error("signal has no value yet")]
    UnsetValue,

    /// The operation needs a surrounding scope or a running watcher.
    #[error("no ambient owner: this operation needs a surrounding scope or a running watcher")]
    RequiredOwner,

    /// A memo or task body failed; the error stays cached until the node
    /// recomputes successfully.
    #[error("{0}")]
    Computation(Error),

    /// Raised by keyed containers built on top of this runtime; the core
    /// never stores null-equivalent values.
    #[error("null-equivalent values cannot be stored in a signal")]
    NullishValue,

    /// Raised by layers that accept user callbacks of varying shape.
    #[error("callback shape not accepted here")]
    InvalidCallback,

    /// Raised by keyed containers built on top of this runtime.
    #[error("duplicate key in a keyed collection")]
    DuplicateKey,

    /// Raised by read-only projections handed out by higher-level stores.
    #[error("signal is read-only")]
    ReadonlySignal,
}
