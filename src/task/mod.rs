//! Two-phase work units and the groups that schedule them.
//!
//! A [`Task`] runs a primary body that may hand back a deferred post
//! body; the two phases are dispatched through the two methods of a
//! [`Dispatch`] binding, so a task can run its body on a worker and its
//! callback on a looper thread. [`TaskStack`] and [`TaskSpawner`] are
//! the grouping shapes: a stack tracks its live tasks in order and owns
//! primary/secondary cancellation, a spawner just stamps out independent
//! tasks sharing one scheduling policy.

pub use self::dispatch::{
    AsyncDispatch, Dispatch, Executor, HandlerDispatch, PoolDispatch, ThreadDispatch,
};
pub use self::pool::SharedPool;
pub use self::spawner::TaskSpawner;
pub use self::stack::TaskStack;
pub use self::task::{ExecFn, PostBody, PostHookFn, Task};

mod dispatch;
mod pool;
mod spawner;
mod stack;
mod task;
