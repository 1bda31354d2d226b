use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taskloop::task::{Task, TaskSpawner, TaskStack, ThreadDispatch};

fn sleeping_exec(millis: u64) -> taskloop::task::ExecFn {
    Box::new(move |_task: &Task| {
        thread::sleep(Duration::from_millis(millis));
        Ok(None)
    })
}

fn quick_exec() -> taskloop::task::ExecFn {
    Box::new(|_task: &Task| Ok(None))
}

#[test]
fn cancel_previous_keeps_only_the_primary() {
    let stack = TaskStack::new(Arc::new(ThreadDispatch));
    let t1 = stack.execute(sleeping_exec(100), None).unwrap();
    let t2 = stack.execute(sleeping_exec(100), None).unwrap();
    let t3 = stack.execute(sleeping_exec(100), None).unwrap();

    stack.cancel_previous().unwrap();

    assert_eq!(stack.len(), 1);
    let primary = stack.primary().unwrap();
    assert_eq!(primary.id(), t3.id());
    assert!(t1.is_canceled());
    assert!(t2.is_canceled());
    assert!(!t3.is_canceled());

    assert!(t3.wait(Duration::from_secs(2)));
}

#[test]
fn primary_is_the_most_recently_added() {
    let stack = TaskStack::new(Arc::new(ThreadDispatch));
    let _t1 = stack.execute(sleeping_exec(100), None).unwrap();
    let t2 = stack.execute(sleeping_exec(100), None).unwrap();

    let primary = stack.primary().unwrap();
    assert_eq!(primary.id(), t2.id());
}

#[test]
fn cancel_removes_the_primary() {
    let stack = TaskStack::new(Arc::new(ThreadDispatch));
    let t1 = stack.execute(sleeping_exec(100), None).unwrap();
    let t2 = stack.execute(sleeping_exec(100), None).unwrap();

    stack.cancel().unwrap();

    assert!(t2.is_canceled());
    assert!(!t1.is_canceled());
    assert_eq!(stack.primary().unwrap().id(), t1.id());
}

#[test]
fn cancel_all_empties_the_stack() {
    let stack = TaskStack::new(Arc::new(ThreadDispatch));
    let t1 = stack.execute(sleeping_exec(100), None).unwrap();
    let t2 = stack.execute(sleeping_exec(100), None).unwrap();

    stack.cancel_all().unwrap();

    assert_eq!(stack.len(), 0);
    assert!(stack.is_empty());
    assert!(t1.is_canceled());
    assert!(t2.is_canceled());
}

#[test]
fn finished_tasks_are_pruned() {
    let stack = TaskStack::new(Arc::new(ThreadDispatch));
    let task = stack.execute(quick_exec(), None).unwrap();
    assert!(task.wait(Duration::from_secs(2)));

    assert_eq!(stack.len(), 0);
    assert!(stack.primary().is_none());
}

#[test]
fn close_cancels_and_rejects() {
    let stack = TaskStack::new(Arc::new(ThreadDispatch));
    let task = stack.execute(sleeping_exec(100), None).unwrap();

    stack.close();
    assert!(stack.is_closed());
    assert!(task.is_canceled());
    assert!(stack.next(quick_exec(), None).is_err());
    assert!(stack.cancel_all().is_err());
    assert!(stack.primary().is_none());
}

#[test]
fn spawner_hands_out_independent_tasks() {
    let spawner = TaskSpawner::new(Arc::new(ThreadDispatch));
    let t1 = spawner.execute(quick_exec(), None).unwrap();
    let t2 = spawner.execute(sleeping_exec(50), None).unwrap();

    // Closing stops new spawns but leaves spawned tasks running.
    spawner.close();
    assert!(spawner.is_closed());
    assert!(spawner.spawn(quick_exec(), None).is_err());

    assert!(t1.wait(Duration::from_secs(2)));
    assert!(t2.wait(Duration::from_secs(2)));
    assert!(t1.is_success());
    assert!(t2.is_success());
}
