use std::fmt;
use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::request::{Job, Runnable};
use crate::task::pool::SharedPool;

/// An external executor a dispatch binding can submit work to.
pub trait Executor: Send + Sync {
    /// Runs `job` somewhere, eventually.
    fn execute(&self, job: Job);
}

/// The capability set a task group owns: where the primary body runs and
/// where the post phase runs.
pub trait Dispatch: Send + Sync {
    /// Schedules the primary body.
    fn dispatch_exec(&self, job: Job) -> Result<()>;

    /// Schedules the post phase.
    fn dispatch_post(&self, job: Job) -> Result<()>;

    /// Releases resources owned by the binding. Called when the owning
    /// group closes.
    fn close(&self) {}
}

/// Runs each primary body on a dedicated thread; post phases run inline
/// on whichever thread finished the body.
#[derive(Debug, Default)]
pub struct ThreadDispatch;

impl Dispatch for ThreadDispatch {
    fn dispatch_exec(&self, job: Job) -> Result<()> {
        thread::Builder::new()
            .name("taskloop-exec".to_string())
            .spawn(job)
            .map(|_| ())
            .map_err(Error::user)
    }

    fn dispatch_post(&self, job: Job) -> Result<()> {
        job();
        Ok(())
    }
}

/// Posts both phases onto handlers, which may be the same or different.
///
/// Built with [`owning`], the binding closes its handlers when the
/// owning group closes.
///
/// [`owning`]: HandlerDispatch::owning
pub struct HandlerDispatch {
    exec: Option<Arc<Handler>>,
    post: Option<Arc<Handler>>,
    owned: bool,
}

impl HandlerDispatch {
    /// Dispatches the primary body to `exec` and the post phase to
    /// `post`.
    pub fn new(exec: Arc<Handler>, post: Arc<Handler>) -> HandlerDispatch {
        HandlerDispatch {
            exec: Some(exec),
            post: Some(post),
            owned: false,
        }
    }

    /// Dispatches both phases to the same handler.
    pub fn single(handler: Arc<Handler>) -> HandlerDispatch {
        HandlerDispatch::new(handler.clone(), handler)
    }

    /// Like [`new`], but the handlers belong to the group: closing the
    /// group closes them.
    ///
    /// [`new`]: HandlerDispatch::new
    pub fn owning(exec: Arc<Handler>, post: Arc<Handler>) -> HandlerDispatch {
        HandlerDispatch {
            exec: Some(exec),
            post: Some(post),
            owned: true,
        }
    }

    fn post_job(handler: &Option<Arc<Handler>>, which: &'static str, job: Job) -> Result<()> {
        let handler = handler.as_ref().ok_or(Error::MissingAttachment(which))?;
        let mut job = Some(job);
        handler.post(Runnable::unit(move || {
            if let Some(job) = job.take() {
                job();
            }
            Ok(())
        }))?;
        Ok(())
    }
}

impl Dispatch for HandlerDispatch {
    fn dispatch_exec(&self, job: Job) -> Result<()> {
        HandlerDispatch::post_job(&self.exec, "exec handler", job)
    }

    fn dispatch_post(&self, job: Job) -> Result<()> {
        HandlerDispatch::post_job(&self.post, "post handler", job)
    }

    fn close(&self) {
        if self.owned {
            if let Some(handler) = &self.exec {
                handler.close();
            }
            if let Some(handler) = &self.post {
                handler.close();
            }
        }
    }
}

impl fmt::Debug for HandlerDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDispatch")
            .field("owned", &self.owned)
            .finish()
    }
}

/// Submits primary bodies to an executor; post phases run inline.
pub struct PoolDispatch {
    pool: Arc<dyn Executor>,
}

impl PoolDispatch {
    /// Dispatches primary bodies to `pool`.
    pub fn new(pool: Arc<dyn Executor>) -> PoolDispatch {
        PoolDispatch { pool }
    }

    /// Dispatches primary bodies to the process-wide [`SharedPool`].
    pub fn shared() -> PoolDispatch {
        PoolDispatch::new(Arc::new(SharedPool))
    }
}

impl Dispatch for PoolDispatch {
    fn dispatch_exec(&self, job: Job) -> Result<()> {
        self.pool.execute(job);
        Ok(())
    }

    fn dispatch_post(&self, job: Job) -> Result<()> {
        job();
        Ok(())
    }
}

impl fmt::Debug for PoolDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PoolDispatch")
    }
}

/// The worker-does-the-work, looper-runs-the-callback binding: primary
/// bodies go to an executor, post phases are posted to a handler.
pub struct AsyncDispatch {
    pool: Arc<dyn Executor>,
    post: Arc<Handler>,
}

impl AsyncDispatch {
    /// Dispatches primary bodies to `pool` and post phases to `post`.
    pub fn new(pool: Arc<dyn Executor>, post: Arc<Handler>) -> AsyncDispatch {
        AsyncDispatch { pool, post }
    }

    /// Uses the process-wide [`SharedPool`] for primary bodies.
    pub fn shared(post: Arc<Handler>) -> AsyncDispatch {
        AsyncDispatch::new(Arc::new(SharedPool), post)
    }
}

impl Dispatch for AsyncDispatch {
    fn dispatch_exec(&self, job: Job) -> Result<()> {
        self.pool.execute(job);
        Ok(())
    }

    fn dispatch_post(&self, job: Job) -> Result<()> {
        let mut job = Some(job);
        self.post.post(Runnable::unit(move || {
            if let Some(job) = job.take() {
                job();
            }
            Ok(())
        }))?;
        Ok(())
    }
}

impl fmt::Debug for AsyncDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncDispatch")
    }
}
