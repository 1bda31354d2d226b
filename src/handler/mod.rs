//! Posting work onto a scheduler and draining it.
//!
//! A [`Handler`] holds two queues: an immediate LIFO stack and a
//! time-sorted delayed queue. Any number of threads may post; a
//! cooperative single-drainer discipline lets exactly one thread at a
//! time walk the queues in [`Handler::next`]. A [`Looper`] is the
//! simplest drainer: it repeatedly pulls one ready request and runs it
//! on its own thread.

pub use self::handler::{Builder, Handler, Wait};
pub use self::looper::Looper;

mod handler;
mod looper;
