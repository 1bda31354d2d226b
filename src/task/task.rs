use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use kv_log_macro::trace;

use crate::error::{Error, Result};
use crate::request::Job;
use crate::state;
use crate::task::Dispatch;
use crate::utils;

/// The deferred post body a primary body may hand back.
pub type PostBody = Box<dyn FnOnce() -> Result<()> + Send>;

/// The primary body of a task: does the work, optionally returns the
/// post body to run afterwards.
pub type ExecFn = Box<dyn FnMut(&Task) -> Result<Option<PostBody>> + Send>;

/// The post handler: receives a snapshot of the terminal state and the
/// accumulated errors, after the post body (if any) has run.
pub type PostHookFn = Box<dyn FnMut(u32, &[Arc<Error>]) -> Result<()> + Send>;

/// A two-phase work unit.
///
/// [`execute`] hands the composed body to the task's [`Dispatch`]
/// binding; the body runs the primary closure, records the outcome, and
/// then dispatches the post phase (deferred post body plus post handler)
/// through the binding's second hook, so the two phases may run on
/// different executors. State and errors mirror [`crate::Request`]: the
/// same bitfield, the same append-only error list, the same advisory
/// cancellation.
///
/// [`execute`]: Task::execute
pub struct Task {
    id: u64,
    dispatch: Arc<dyn Dispatch>,
    inner: Mutex<Inner>,
    cond: Condvar,
}

struct Inner {
    state: u32,
    exec: Option<ExecFn>,
    post: Option<PostHookFn>,
    errors: Vec<Arc<Error>>,
}

impl Task {
    /// Creates a task around `exec`, scheduled through `dispatch`.
    pub fn new(dispatch: Arc<dyn Dispatch>, exec: ExecFn) -> Arc<Task> {
        Task::build(dispatch, Some(exec), None)
    }

    /// Creates a task with a post handler as well.
    pub fn with_post(dispatch: Arc<dyn Dispatch>, exec: ExecFn, post: PostHookFn) -> Arc<Task> {
        Task::build(dispatch, Some(exec), Some(post))
    }

    pub(crate) fn build(
        dispatch: Arc<dyn Dispatch>,
        exec: Option<ExecFn>,
        post: Option<PostHookFn>,
    ) -> Arc<Task> {
        Arc::new(Task {
            id: utils::next_id(),
            dispatch,
            inner: Mutex::new(Inner {
                state: state::NONE,
                exec,
                post,
                errors: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// This task's process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Attaches (or replaces) the primary body and wakes a dispatched
    /// run that may be waiting for it.
    pub fn set_exec(&self, exec: ExecFn) {
        let mut inner = self.inner.lock().unwrap();
        inner.exec = Some(exec);
        drop(inner);
        self.cond.notify_all();
    }

    /// Attaches the post handler.
    pub fn set_post(&self, post: PostHookFn) {
        self.inner.lock().unwrap().post = Some(post);
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

    /// Whether the task was ever executed (or claimed).
    pub fn is_started(&self) -> bool {
        state::is_started(self.state())
    }

    /// Whether a thread is inside the primary body right now.
    pub fn is_running(&self) -> bool {
        state::is_running(self.state())
    }

    /// Whether the task reached a terminal state.
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

    /// Pre-seeds the outcome so a dispatched run bypasses the primary
    /// body and goes straight to the post phase.
    pub fn preset_outcome(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if state::is_done(inner.state) {
            return;
        }
        let outcome = if success { state::SUCCESS } else { state::FAILED };
        inner.state |= outcome & !state::DONE;
    }

    /// Requests cancellation. Advisory, exactly as for
    /// [`crate::Request::cancel`]: bodies already in flight finish, and
    /// bodies not yet started are skipped.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if state::is_done(inner.state) && !state::is_canceled(inner.state) {
            return false;
        }
        if state::is_running(inner.state) {
            inner.state |= state::CANCELED & !state::DONE;
        } else {
            inner.state |= state::CANCELED;
        }
        drop(inner);
        self.cond.notify_all();
        trace!("task canceled", { id: self.id });
        true
    }

    /// Claims the task and hands its composed body to the exec hook of
    /// the dispatch binding.
    ///
    /// If the exec hook itself fails, the task is marked failed and the
    /// same body falls back to the post hook, so the post phase still
    /// gets a chance to report. Returns `!self.is_canceled()`.
    pub fn execute(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if !state::is_started(inner.state) {
                inner.state |= state::STARTED;
                inner.errors.clear();
            }
        }

        let this = self.clone();
        let job: Job = Box::new(move || this.run());
        if let Err(err) = self.dispatch.dispatch_exec(job) {
            {
                let mut inner = self.inner.lock().unwrap();
                inner.state |= state::FAILED & !state::DONE;
                inner.errors.push(Arc::new(err));
            }
            let this = self.clone();
            let job: Job = Box::new(move || this.run());
            if let Err(err) = self.dispatch.dispatch_post(job) {
                let mut inner = self.inner.lock().unwrap();
                inner.state |= (state::FAILED | state::POST_FAILED) & !state::DONE;
                inner.errors.push(Arc::new(err));
            }
        }
        !self.is_canceled()
    }

    /// The dispatched body: runs the primary closure, records the
    /// terminal state, then arranges the post phase.
    fn run(self: &Arc<Self>) {
        let (body, skip) = {
            let mut inner = self.inner.lock().unwrap();
            if state::is_done(inner.state) {
                // Canceled (or otherwise finished) before the body ran.
                return;
            }
            inner.state |= state::RUNNING;
            if inner.exec.is_none() {
                // Tolerate a caller that attaches the body just after
                // dispatching.
                let (guard, _) = self
                    .cond
                    .wait_timeout(inner, crate::RETRY_TIMEOUT)
                    .unwrap();
                inner = guard;
            }
            let skip = state::is_success(inner.state)
                || state::is_failed(inner.state)
                || state::is_canceled(inner.state);
            (inner.exec.take(), skip)
        };

        let mut success = false;
        let mut canceled = false;
        let mut failure = None;
        let mut post_body = None;
        if !skip {
            match body {
                Some(mut f) => match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
                    Ok(Ok(deferred)) => {
                        success = true;
                        post_body = deferred;
                    }
                    Ok(Err(err)) if err.is_cancellation() => canceled = true,
                    Ok(Err(err)) => failure = Some(err),
                    Err(payload) => failure = Some(Error::from_panic(payload)),
                },
                None => failure = Some(Error::MissingAttachment("exec body")),
            }
        }

        let (ended_elsewhere, has_post) = {
            let mut inner = self.inner.lock().unwrap();
            let already_done = state::is_done(inner.state);
            if !already_done {
                inner.state &= !(state::RUNNING & !state::READY);
                if success {
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
            }
            (already_done, inner.post.is_some())
        };
        self.cond.notify_all();
        trace!("task done", { id: self.id, ok: success });

        if ended_elsewhere || (post_body.is_none() && !has_post) {
            return;
        }

        let this = self.clone();
        let post: Job = Box::new(move || this.run_post(post_body, success));
        if skip {
            post();
        } else if let Err(err) = self.dispatch.dispatch_post(post) {
            self.record_post_failure(err);
        }
    }

    /// The post phase: the deferred post body (only after a success),
    /// then the post handler. Each leg is unwind-guarded on its own, so
    /// a failing post body still lets the handler observe the state.
    fn run_post(self: &Arc<Self>, post_body: Option<PostBody>, success: bool) {
        if success {
            if let Some(body) = post_body {
                let outcome = panic::catch_unwind(AssertUnwindSafe(body));
                let err = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(payload) => Some(Error::from_panic(payload)),
                };
                if let Some(err) = err {
                    self.record_post_failure(err);
                }
            }
        }

        let hook = self.inner.lock().unwrap().post.take();
        if let Some(mut hook) = hook {
            let (snapshot, errors) = self.snapshot();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(snapshot, &errors)));
            let err = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) => Some(Error::from_panic(payload)),
            };
            if let Some(err) = err {
                self.record_post_failure(err);
            }
        }
        self.cond.notify_all();
    }

    fn record_post_failure(&self, err: Error) {
        let mut inner = self.inner.lock().unwrap();
        inner.state |= state::POST_FAILED;
        inner.errors.push(Arc::new(err));
        drop(inner);
        self.cond.notify_all();
    }

    /// Blocks until the task is done, or until `timeout` elapses.
    /// Returns `true` if the task completed in time.
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

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (snapshot, errors) = self.snapshot();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &format_args!("{:#010x}", snapshot))
            .field("errors", &errors.len())
            .finish()
    }
}
