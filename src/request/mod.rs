//! Single-phase work units and the callable shapes a handler accepts.
//!
//! A [`Request`] owns its state bitfield, its error list, and the user
//! body to run; a [`Runnable`] is any of the callable shapes that can be
//! posted to a handler and is wrapped into a fresh `Request` on post.

pub use self::request::{ExecFn, PostDispatchFn, PostExecFn, PrepareFn, Request};
pub use self::runnable::Runnable;

mod request;
mod runnable;

/// An opaque unit of work handed to an execution hook.
pub type Job = Box<dyn FnOnce() + Send>;
