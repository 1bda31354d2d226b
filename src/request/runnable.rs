use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::request::Request;

/// A callable shape that can be posted to a handler.
///
/// Posting wraps the two closure shapes into a fresh [`Request`]; an
/// already-built request is posted as-is. The zero-argument and
/// one-argument worlds cross-promote here: a unit closure is lifted to a
/// request-consuming one by ignoring the argument.
pub enum Runnable {
    /// A zero-argument body.
    Unit(Box<dyn FnMut() -> Result<()> + Send>),
    /// A body that receives the request driving it.
    Bound(Box<dyn FnMut(&Request) -> Result<()> + Send>),
    /// An already-built request.
    Request(Arc<Request>),
}

impl Runnable {
    /// Wraps a zero-argument body.
    pub fn unit<F>(f: F) -> Runnable
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        Runnable::Unit(Box::new(f))
    }

    /// Wraps a body that receives its request.
    pub fn bound<F>(f: F) -> Runnable
    where
        F: FnMut(&Request) -> Result<()> + Send + 'static,
    {
        Runnable::Bound(Box::new(f))
    }

    pub(crate) fn into_request(self) -> Arc<Request> {
        match self {
            Runnable::Unit(mut f) => Request::with_exec(Box::new(move |_| f())),
            Runnable::Bound(f) => Request::with_exec(f),
            Runnable::Request(request) => request,
        }
    }
}

impl From<Arc<Request>> for Runnable {
    fn from(request: Arc<Request>) -> Runnable {
        Runnable::Request(request)
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runnable::Unit(_) => f.write_str("Runnable::Unit"),
            Runnable::Bound(_) => f.write_str("Runnable::Bound"),
            Runnable::Request(request) => {
                f.debug_tuple("Runnable::Request").field(request).finish()
            }
        }
    }
}
