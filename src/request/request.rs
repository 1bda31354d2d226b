use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use kv_log_macro::trace;

use crate::error::{Error, Result};
use crate::request::Job;
use crate::state;
use crate::utils;

/// The primary body of a request.
pub type ExecFn = Box<dyn FnMut(&Request) -> Result<()> + Send>;

/// The post-exec callback: receives a snapshot of the terminal state and
/// the accumulated errors.
pub type PostExecFn = Box<dyn FnMut(u32, &[Arc<Error>]) -> Result<()> + Send>;

/// The preparation hook consulted by [`Request::ready`]. Returning
/// `Ok(false)` refuses readiness for now; the scheduler will retry.
pub type PrepareFn = Box<dyn FnMut(&Request) -> Result<bool> + Send>;

/// The hook that decides where the post-exec callback runs. The default
/// is to invoke it inline on the executing thread.
pub type PostDispatchFn = Box<dyn FnMut(Job) -> Result<()> + Send>;

/// A single-phase work unit driven by a handler.
///
/// A request owns its lifecycle bitfield (see [`crate::state`]), an
/// append-only error list, and the closures attached to it. All mutation
/// happens under the request's own lock; completion transitions pulse a
/// condition variable that [`wait`] and the brief attach-wait in
/// [`execute`] sleep on.
///
/// [`wait`]: Request::wait
/// [`execute`]: Request::execute
pub struct Request {
    id: u64,
    inner: Mutex<Inner>,
    cond: Condvar,
}

struct Inner {
    state: u32,
    exec: Option<ExecFn>,
    post: Option<PostExecFn>,
    prepare: Option<PrepareFn>,
    post_dispatch: Option<PostDispatchFn>,
    errors: Vec<Arc<Error>>,
}

impl Request {
    /// Creates a request with no body attached yet.
    ///
    /// The body can be attached later with [`set_exec`]; `execute`
    /// tolerates a brief window between posting and attaching.
    ///
    /// [`set_exec`]: Request::set_exec
    pub fn new() -> Arc<Request> {
        Request::build(None)
    }

    /// Creates a request around `exec`.
    pub fn with_exec(exec: ExecFn) -> Arc<Request> {
        Request::build(Some(exec))
    }

    fn build(exec: Option<ExecFn>) -> Arc<Request> {
        Arc::new(Request {
            id: utils::next_id(),
            inner: Mutex::new(Inner {
                state: state::NONE,
                exec,
                post: None,
                prepare: None,
                post_dispatch: None,
                errors: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// This request's process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Attaches (or replaces) the primary body and wakes an executor
    /// that may be waiting for it.
    pub fn set_exec(&self, exec: ExecFn) {
        let mut inner = self.inner.lock().unwrap();
        inner.exec = Some(exec);
        drop(inner);
        self.cond.notify_all();
    }

    /// Attaches the post-exec callback.
    pub fn set_post(&self, post: PostExecFn) {
        self.inner.lock().unwrap().post = Some(post);
    }

    /// Attaches the preparation hook consulted by [`Request::ready`].
    pub fn set_prepare(&self, prepare: PrepareFn) {
        self.inner.lock().unwrap().prepare = Some(prepare);
    }

    /// Attaches the hook that decides where the post-exec callback runs.
    pub fn set_post_dispatch(&self, dispatch: PostDispatchFn) {
        self.inner.lock().unwrap().post_dispatch = Some(dispatch);
    }

    /// The current state bits.
    pub fn state(&self) -> u32 {
        self.inner.lock().unwrap().state
    }

    /// A snapshot of the current state and errors, taken atomically.
    pub fn snapshot(&self) -> (u32, Vec<Arc<Error>>) {
        let inner = self.inner.lock().unwrap();
        (inner.state, inner.errors.clone())
    }

    /// A snapshot of the accumulated errors.
    pub fn errors(&self) -> Vec<Arc<Error>> {
        self.inner.lock().unwrap().errors.clone()
    }

    /// Whether the request was ever posted or claimed.
    pub fn is_started(&self) -> bool {
        state::is_started(self.state())
    }

    /// Whether the request passed preparation and may be picked up.
    pub fn is_ready(&self) -> bool {
        state::is_ready(self.state())
    }

    /// Whether a thread is inside the body right now.
    pub fn is_running(&self) -> bool {
        state::is_running(self.state())
    }

    /// Whether the request reached a terminal state.
    pub fn is_done(&self) -> bool {
        state::is_done(self.state())
    }

    /// Whether cancellation was observed.
    pub fn is_canceled(&self) -> bool {
        state::is_canceled(self.state())
    }

    /// Whether the success bit is set. See [`state::is_success`] for the
    /// pre-set caveat.
    pub fn is_success(&self) -> bool {
        state::is_success(self.state())
    }

    /// Whether the failure bit is set.
    pub fn is_failed(&self) -> bool {
        state::is_failed(self.state())
    }

    /// Whether the post phase failed.
    pub fn is_post_failed(&self) -> bool {
        state::is_post_failed(self.state())
    }

    /// Whether the request is started but neither running nor done.
    pub fn is_waiting(&self) -> bool {
        state::is_waiting(self.state())
    }

    /// Claims the request: `NONE` becomes `STARTED` and the error list
    /// is reset. A second call is a no-op.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if state::is_started(inner.state) {
            return;
        }
        inner.state |= state::STARTED;
        inner.errors.clear();
    }

    /// Pre-seeds the outcome so the next run bypasses the user body and
    /// goes straight to post-exec dispatch.
    pub fn preset_outcome(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if state::is_done(inner.state) {
            return;
        }
        let outcome = if success { state::SUCCESS } else { state::FAILED };
        inner.state |= outcome & !state::DONE;
    }

    /// Requests cancellation.
    ///
    /// Advisory: a body already in flight runs to completion and the
    /// terminal state then includes `CANCELED`. Returns `false` only if
    /// the request already completed without cancellation.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if state::is_done(inner.state) && !state::is_canceled(inner.state) {
            return false;
        }
        if state::is_running(inner.state) {
            // The terminal transition adds DONE when the body finishes.
            inner.state |= state::CANCELED & !state::DONE;
        } else {
            inner.state |= state::CANCELED;
        }
        drop(inner);
        self.cond.notify_all();
        trace!("request canceled", { id: self.id });
        true
    }

    /// Transitions `STARTED` to `READY` through the preparation hook.
    ///
    /// While the hook runs the state takes a transient "preparing" shape
    /// with the started flag parked. A hook error makes the request
    /// ready-and-failed so the scheduler can pick it up and retire it
    /// through the skip path; a refusal (`Ok(false)`) or a cancellation
    /// observed meanwhile leaves it `STARTED` and returns `false`.
    pub fn ready(&self) -> bool {
        let mut hook = {
            let mut inner = self.inner.lock().unwrap();
            if !state::is_started(inner.state)
                || state::is_running(inner.state)
                || state::is_done(inner.state)
            {
                return false;
            }
            match inner.prepare.take() {
                None => {
                    inner.state |= state::READY;
                    return true;
                }
                Some(hook) => {
                    inner.state =
                        (inner.state & !state::STARTED) | (state::READY & !state::STARTED);
                    hook
                }
            }
        };

        let verdict = panic::catch_unwind(AssertUnwindSafe(|| hook(self)));

        let mut inner = self.inner.lock().unwrap();
        inner.prepare = Some(hook);
        let verdict = match verdict {
            Ok(Ok(ready)) => Ok(ready),
            Ok(Err(err)) => Err(err),
            Err(payload) => Err(Error::from_panic(payload)),
        };
        match verdict {
            Ok(true) if !state::is_canceled(inner.state) => {
                inner.state |= state::READY;
                true
            }
            Ok(_) => {
                // Back to STARTED, not ready; the scheduler will retry.
                inner.state =
                    (inner.state | state::STARTED) & !(state::READY & !state::STARTED);
                false
            }
            Err(err) if err.is_cancellation() => {
                inner.state = (inner.state | state::CANCELED)
                    & !(state::READY & !state::STARTED);
                false
            }
            Err(err) => {
                inner.state |= state::READY | (state::FAILED & !state::DONE);
                inner.errors.push(Arc::new(err));
                true
            }
        }
    }

    /// Runs the primary body and dispatches the post-exec callback.
    ///
    /// The precondition is a `READY` request that is neither running nor
    /// done; anything else returns `false` without side effects. A
    /// pre-set outcome bit skips the body entirely. Returns `true` iff
    /// the body ran and succeeded.
    pub fn execute(self: &Arc<Self>) -> bool {
        let (body, skip) = {
            let mut inner = self.inner.lock().unwrap();
            if !state::is_ready(inner.state)
                || state::is_running(inner.state)
                || state::is_done(inner.state)
            {
                return false;
            }
            inner.state |= state::RUNNING;
            if inner.exec.is_none() {
                // Tolerate a caller that attaches the body just after
                // posting.
                let (guard, _) = self
                    .cond
                    .wait_timeout(inner, crate::RETRY_TIMEOUT)
                    .unwrap();
                inner = guard;
            }
            let skip = state::is_success(inner.state) || state::is_failed(inner.state);
            (inner.exec.take(), skip)
        };

        let mut ran_ok = false;
        let mut canceled = false;
        let mut failure = None;
        if !skip {
            match body {
                Some(mut f) => match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
                    Ok(Ok(())) => ran_ok = true,
                    Ok(Err(err)) if err.is_cancellation() => canceled = true,
                    Ok(Err(err)) => failure = Some(err),
                    Err(payload) => failure = Some(Error::from_panic(payload)),
                },
                None => failure = Some(Error::MissingAttachment("exec body")),
            }
        }

        let (finished, has_post) = {
            let mut inner = self.inner.lock().unwrap();
            let already_done = state::is_done(inner.state);
            inner.state &= !(state::RUNNING & !state::READY);
            if ran_ok {
                inner.state |= state::SUCCESS & !state::DONE;
            }
            if let Some(err) = failure {
                inner.state |= state::FAILED & !state::DONE;
                inner.errors.push(Arc::new(err));
            }
            if canceled {
                inner.state |= state::CANCELED & !state::DONE;
            }
            inner.state |= state::DONE;
            (!already_done, inner.post.is_some())
        };
        self.cond.notify_all();
        trace!("request done", { id: self.id, ok: ran_ok });

        if finished && has_post {
            self.dispatch_post_phase();
        }
        ran_ok
    }

    fn dispatch_post_phase(self: &Arc<Self>) {
        let this = self.clone();
        let closure: Job = Box::new(move || {
            let hook = this.inner.lock().unwrap().post.take();
            if let Some(mut hook) = hook {
                let (snapshot, errors) = this.snapshot();
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| hook(snapshot, &errors)));
                let err = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(payload) => Some(Error::from_panic(payload)),
                };
                if let Some(err) = err {
                    this.record_post_failure(err);
                }
            }
        });

        let dispatcher = self.inner.lock().unwrap().post_dispatch.take();
        match dispatcher {
            None => closure(),
            Some(mut dispatch) => {
                let outcome = dispatch(closure);
                self.inner.lock().unwrap().post_dispatch = Some(dispatch);
                if let Err(err) = outcome {
                    self.record_post_failure(err);
                }
            }
        }
    }

    fn record_post_failure(&self, err: Error) {
        let mut inner = self.inner.lock().unwrap();
        inner.state |= state::POST_FAILED;
        inner.errors.push(Arc::new(err));
        drop(inner);
        self.cond.notify_all();
    }

    /// Blocks until the request is done, or until `timeout` elapses.
    /// Returns `true` if the request completed in time.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        while !state::is_done(inner.state) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
        true
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (snapshot, errors) = self.snapshot();
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("state", &format_args!("{:#010x}", snapshot))
            .field("errors", &errors.len())
            .finish()
    }
}
