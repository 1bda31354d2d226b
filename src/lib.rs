//! A two-layer task execution library.
//!
//! The lower layer posts single-phase work units ([`Request`]s) onto a
//! [`Handler`] — a dual-queue scheduler with an immediate LIFO stack and
//! a time-sorted delayed queue — and drains them with a [`Looper`]. The
//! upper layer composes two-phase [`Task`]s (a primary body plus a
//! deferred post phase) whose phases can run on independent executors,
//! grouped by [`TaskStack`]s and [`TaskSpawner`]s that own the
//! scheduling policy and cancellation semantics for whole families of
//! tasks.
//!
//! # Examples
//!
//! Post a runnable and drain it with a looper:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use taskloop::{Handler, Looper, Runnable, Wait};
//!
//! let handler = Handler::new();
//! let log = Arc::new(Mutex::new(String::new()));
//!
//! let entry = log.clone();
//! handler
//!     .post(Runnable::unit(move || {
//!         entry.lock().unwrap().push('a');
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! let looper = Looper::new(handler);
//! looper.start();
//! assert!(looper.handle(Wait::Forever));
//! assert_eq!(log.lock().unwrap().as_str(), "a");
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

use std::time::Duration;

pub mod clock;
pub mod collections;
pub mod error;
pub mod handler;
pub mod request;
pub mod state;
pub mod task;

pub(crate) mod utils;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::{Error, Result};
pub use crate::handler::{Handler, Looper, Wait};
pub use crate::request::{Request, Runnable};
pub use crate::task::{Task, TaskSpawner, TaskStack};

/// How long a scheduler sleeps before revisiting work that refused
/// readiness, and how long an executor waits for a body attached just
/// after posting.
pub const RETRY_TIMEOUT: Duration = Duration::from_millis(20);

/// The per-pass timeout a looper's run loop uses by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(700);
