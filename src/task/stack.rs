use std::fmt;
use std::sync::{Arc, Mutex};

use crate::collections::Stack;
use crate::error::{Error, Result};
use crate::task::task::{ExecFn, PostHookFn, Task};
use crate::task::Dispatch;

/// An ordered group of tasks sharing one scheduling policy.
///
/// Tasks are tracked in insertion order; the *primary* task is the most
/// recently added one that is still live. Every read first prunes tasks
/// that finished or were never executed. Closing cancels everything and
/// is absorbing.
pub struct TaskStack {
    dispatch: Arc<dyn Dispatch>,
    inner: Mutex<Inner>,
}

struct Inner {
    tasks: Stack<Arc<Task>>,
    closed: bool,
}

impl TaskStack {
    /// Creates a stack whose tasks are scheduled through `dispatch`.
    pub fn new(dispatch: Arc<dyn Dispatch>) -> TaskStack {
        TaskStack {
            dispatch,
            inner: Mutex::new(Inner {
                tasks: Stack::new(),
                closed: false,
            }),
        }
    }

    /// Drops tasks that are done or were never started.
    fn update(inner: &mut Inner) {
        inner
            .tasks
            .retain(|task| task.is_started() && !task.is_done());
    }

    /// Creates a task bound to this stack's scheduling policy and
    /// appends it. The task is not executed yet.
    pub fn next(&self, exec: ExecFn, post: Option<PostHookFn>) -> Result<Arc<Task>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::Closed("task stack"));
        }
        TaskStack::update(&mut inner);
        let task = Task::build(self.dispatch.clone(), Some(exec), post);
        inner.tasks.push(task.clone())?;
        Ok(task)
    }

    /// Creates a task and executes it immediately.
    pub fn execute(&self, exec: ExecFn, post: Option<PostHookFn>) -> Result<Arc<Task>> {
        let task = self.next(exec, post)?;
        task.execute();
        Ok(task)
    }

    /// The most recently added live task.
    pub fn primary(&self) -> Option<Arc<Task>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return None;
        }
        TaskStack::update(&mut inner);
        inner.tasks.peek().cloned()
    }

    /// Removes and cancels the primary task.
    pub fn cancel(&self) -> Result<()> {
        let primary = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(Error::Closed("task stack"));
            }
            TaskStack::update(&mut inner);
            inner.tasks.pop()
        };
        if let Some(task) = primary {
            task.cancel();
        }
        Ok(())
    }

    /// Cancels every task and clears the group.
    pub fn cancel_all(&self) -> Result<()> {
        let victims = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(Error::Closed("task stack"));
            }
            TaskStack::drain(&mut inner)
        };
        for task in victims {
            task.cancel();
        }
        Ok(())
    }

    /// Keeps only the primary task and cancels the rest.
    pub fn cancel_previous(&self) -> Result<()> {
        let victims = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(Error::Closed("task stack"));
            }
            TaskStack::update(&mut inner);
            let primary = inner.tasks.pop();
            let victims = TaskStack::drain(&mut inner);
            if let Some(primary) = primary {
                inner.tasks.push(primary)?;
            }
            victims
        };
        for task in victims {
            task.cancel();
        }
        Ok(())
    }

    fn drain(inner: &mut Inner) -> Vec<Arc<Task>> {
        let drained: Vec<_> = inner.tasks.iter().cloned().collect();
        inner.tasks.clear();
        drained
    }

    /// Cancels everything and closes the stack; later operations fail
    /// with [`Error::Closed`].
    pub fn close(&self) {
        let victims = {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            TaskStack::drain(&mut inner)
        };
        for task in victims {
            task.cancel();
        }
        self.dispatch.close();
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        TaskStack::update(&mut inner);
        inner.tasks.len()
    }

    /// Whether no live tasks remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the stack was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

impl fmt::Debug for TaskStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("TaskStack")
            .field("tasks", &inner.tasks.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
