//! Ring-buffered sequences backing the scheduler queues.
//!
//! [`Deque`] is a fixed-capacity double-ended ring buffer that grows on
//! demand through [`Deque::ensure`]; [`Stack`] is the LIFO view of it
//! used for pending immediate work.

pub use deque::Deque;
pub use stack::Stack;

mod deque;
mod stack;
