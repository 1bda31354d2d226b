//! Errors raised by posting, spawning, and executing work units.

use std::any::Any;

use thiserror::Error;

/// A specialized result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for scheduling operations and user bodies.
///
/// Structural errors (`Closed`, `MissingAttachment`, `InvalidArgument`)
/// are returned synchronously from the posting or spawning call. Errors
/// produced by user bodies are captured, appended to the owning unit's
/// error list, and reflected in its state; they never unwind out of
/// `execute`.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation on a closed handler, task stack, or task spawner.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// A dispatch hook required a collaborator that was not attached.
    #[error("missing attachment: {0}")]
    MissingAttachment(&'static str),

    /// A caller-supplied value was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The cancellation signal. Returning this from a user body promotes
    /// the owning unit to `CANCELED` instead of `FAILED`.
    #[error("canceled")]
    Canceled,

    /// An error returned by user code.
    #[error("user error: {0}")]
    User(Box<dyn std::error::Error + Send + Sync>),

    /// A panic captured from user code.
    #[error("user code panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Wraps an arbitrary error produced by user code.
    pub fn user(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Error {
        Error::User(err.into())
    }

    /// The predicate that detects the cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Error {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "user code panicked".to_string()
        };
        Error::Panicked(message)
    }
}
