use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taskloop::request::Request;
use taskloop::{state, Error, Handler, Runnable, Wait};

#[test]
fn start_is_idempotent() {
    let request = Request::new();
    request.start();
    let once = request.state();
    request.start();
    assert_eq!(request.state(), once);
    assert!(request.is_started());
}

#[test]
fn cancel_then_execute_skips_the_body() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let request = Request::with_exec(Box::new(move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));
    request.start();
    assert!(request.cancel());

    assert!(!request.ready());
    assert!(!request.execute());
    assert!(!ran.load(Ordering::SeqCst));
    assert!(request.is_canceled());
    assert!(request.is_done());
}

#[test]
fn cancel_after_completion_returns_false() {
    let request = Request::with_exec(Box::new(|_| Ok(())));
    request.start();
    assert!(request.ready());
    assert!(request.execute());
    assert!(!request.cancel());
    assert!(!request.is_canceled());
}

#[test]
fn preset_success_bypasses_the_body() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let request = Request::with_exec(Box::new(move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));
    let post_runs = Arc::new(AtomicUsize::new(0));
    let counter = post_runs.clone();
    request.set_post(Box::new(move |snapshot, errors| {
        assert!(state::is_done(snapshot));
        assert!(state::is_success(snapshot));
        assert!(errors.is_empty());
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    request.start();
    request.preset_outcome(true);
    assert!(request.ready());
    // The body is skipped, so this run did not "succeed".
    assert!(!request.execute());

    assert!(!ran.load(Ordering::SeqCst));
    assert!(request.is_done());
    assert!(request.is_success());
    assert_eq!(post_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn body_errors_are_captured() {
    let request = Request::with_exec(Box::new(|_| Err(Error::user("boom"))));
    request.start();
    assert!(request.ready());
    assert!(!request.execute());

    assert!(request.is_done());
    assert!(request.is_failed());
    assert!(!request.is_success());
    assert_eq!(request.errors().len(), 1);
}

#[test]
fn cancellation_error_promotes_to_canceled() {
    let request = Request::with_exec(Box::new(|_| Err(Error::Canceled)));
    request.start();
    assert!(request.ready());
    assert!(!request.execute());

    assert!(request.is_done());
    assert!(request.is_canceled());
    assert!(!request.is_failed());
    assert!(request.errors().is_empty());
}

#[test]
fn body_panics_are_captured() {
    let request = Request::with_exec(Box::new(|_| panic!("kaboom")));
    request.start();
    assert!(request.ready());
    assert!(!request.execute());

    assert!(request.is_done());
    assert!(request.is_failed());
    assert_eq!(request.errors().len(), 1);
}

#[test]
fn prepare_refusal_keeps_the_request_started() {
    let request = Request::with_exec(Box::new(|_| Ok(())));
    request.set_prepare(Box::new(|_| Ok(false)));
    request.start();

    assert!(!request.ready());
    assert!(request.is_started());
    assert!(!request.is_ready());
    assert!(request.is_waiting());
}

#[test]
fn prepare_error_surfaces_as_ready_and_failed() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let request = Request::with_exec(Box::new(move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));
    request.set_prepare(Box::new(|_| Err(Error::user("not today"))));
    request.start();

    // Ready-and-failed: the scheduler can pick it up and retire it
    // through the skip path.
    assert!(request.ready());
    assert!(request.is_ready());
    assert!(request.is_failed());

    assert!(!request.execute());
    assert!(!ran.load(Ordering::SeqCst));
    assert!(request.is_done());
    assert_eq!(request.errors().len(), 1);
}

#[test]
fn post_callback_failure_sets_post_failed() {
    let request = Request::with_exec(Box::new(|_| Ok(())));
    request.set_post(Box::new(|_, _| Err(Error::user("post boom"))));
    request.start();
    assert!(request.ready());
    assert!(request.execute());

    assert!(request.is_success());
    assert!(request.is_post_failed());
    assert_eq!(request.errors().len(), 1);
}

#[test]
fn execute_waits_briefly_for_a_late_body() {
    let handler = Handler::new();
    let request = Request::new();
    handler.post(Runnable::from(request.clone())).unwrap();

    let next = handler.next(Wait::NoWait).unwrap();
    let worker = thread::spawn(move || next.execute());

    thread::sleep(Duration::from_millis(5));
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    request.set_exec(Box::new(move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));

    assert!(worker.join().unwrap());
    assert!(ran.load(Ordering::SeqCst));
    assert!(request.is_success());
}

#[test]
fn missing_body_fails_after_the_attach_window() {
    let request = Request::new();
    request.start();
    assert!(request.ready());
    assert!(!request.execute());
    assert!(request.is_failed());
    assert_eq!(request.errors().len(), 1);
}

#[test]
fn wait_times_out_on_an_unfinished_request() {
    let request = Request::new();
    request.start();
    assert!(!request.wait(Duration::from_millis(50)));
}
