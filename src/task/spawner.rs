use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::task::task::{ExecFn, PostHookFn, Task};
use crate::task::Dispatch;

/// An unbounded factory of independent tasks sharing one scheduling
/// policy.
///
/// Unlike a [`crate::TaskStack`], a spawner keeps no list: every spawned
/// task is owned by the caller. Closing only stops new spawns; tasks
/// already handed out run to completion.
pub struct TaskSpawner {
    dispatch: Arc<dyn Dispatch>,
    closed: Mutex<bool>,
}

impl TaskSpawner {
    /// Creates a spawner whose tasks are scheduled through `dispatch`.
    pub fn new(dispatch: Arc<dyn Dispatch>) -> TaskSpawner {
        TaskSpawner {
            dispatch,
            closed: Mutex::new(false),
        }
    }

    /// Creates a fresh task bound to this spawner's scheduling policy.
    pub fn spawn(&self, exec: ExecFn, post: Option<PostHookFn>) -> Result<Arc<Task>> {
        if *self.closed.lock().unwrap() {
            return Err(Error::Closed("task spawner"));
        }
        Ok(Task::build(self.dispatch.clone(), Some(exec), post))
    }

    /// Creates a task and executes it immediately.
    pub fn execute(&self, exec: ExecFn, post: Option<PostHookFn>) -> Result<Arc<Task>> {
        let task = self.spawn(exec, post)?;
        task.execute();
        Ok(task)
    }

    /// Stops new spawns. Existing tasks are unaffected.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.dispatch.close();
    }

    /// Whether the spawner was closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl fmt::Debug for TaskSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpawner")
            .field("closed", &self.is_closed())
            .finish()
    }
}
