use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use taskloop::{Handler, Looper, ManualClock, Runnable, Wait};

fn append(log: &Arc<Mutex<String>>, piece: char) -> Runnable {
    let log = log.clone();
    Runnable::unit(move || {
        log.lock().unwrap().push(piece);
        Ok(())
    })
}

#[test]
fn immediate_post_runs_once() {
    let handler = Handler::new();
    let log = Arc::new(Mutex::new(String::new()));
    let request = handler.post(append(&log, 'a')).unwrap();

    let looper = Looper::new(handler);
    looper.start();
    assert!(looper.handle(Wait::Forever));

    assert_eq!(log.lock().unwrap().as_str(), "a");
    assert!(request.is_done());
    assert!(request.is_success());
}

#[test]
fn undrained_posts_run_in_lifo_order() {
    let handler = Handler::new();
    let log = Arc::new(Mutex::new(String::new()));
    handler.post(append(&log, '1')).unwrap();
    handler.post(append(&log, '2')).unwrap();
    handler.post(append(&log, '3')).unwrap();

    let looper = Looper::new(handler);
    looper.start();
    for _ in 0..3 {
        assert!(looper.handle(Wait::Forever));
    }

    assert_eq!(log.lock().unwrap().as_str(), "321");
}

#[test]
fn delayed_post_runs_after_its_due_time() {
    let handler = Handler::new();
    let log = Arc::new(Mutex::new(String::new()));
    let first = handler.post(append(&log, 'a')).unwrap();
    let second = handler
        .post_delayed(append(&log, 'b'), Duration::from_millis(50))
        .unwrap();

    let looper = Looper::new(handler.clone());
    looper.start();
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(200) {
        looper.handle(Wait::For(Duration::from_millis(10)));
    }

    assert_eq!(log.lock().unwrap().as_str(), "ab");
    assert!(first.is_done());
    assert!(second.is_done());
    assert_eq!(handler.pending(), 0);
}

#[test]
fn post_at_respects_a_manual_clock() {
    let clock = Arc::new(ManualClock::new(0));
    let handler = Handler::builder().clock(clock.clone()).build();
    let request = handler.post_at(Runnable::unit(|| Ok(())), 100).unwrap();

    assert!(handler.next(Wait::NoWait).is_none());

    clock.advance(150);
    let next = handler.next(Wait::NoWait).unwrap();
    assert_eq!(next.id(), request.id());
    assert!(next.is_ready());
    assert!(next.execute());
    assert!(request.is_done());
    assert!(request.is_success());
}

#[test]
fn bound_runnable_receives_its_request() {
    let handler = Handler::new();
    let seen = Arc::new(Mutex::new(None));
    let slot = seen.clone();
    let request = handler
        .post(Runnable::bound(move |request| {
            *slot.lock().unwrap() = Some(request.id());
            Ok(())
        }))
        .unwrap();

    let next = handler.next(Wait::NoWait).unwrap();
    assert!(next.execute());
    assert_eq!(*seen.lock().unwrap(), Some(request.id()));
}

#[test]
fn closed_handler_rejects_everything() {
    let handler = Handler::new();
    handler.close();
    assert!(handler.is_closed());
    assert!(handler.post(Runnable::unit(|| Ok(()))).is_err());
    assert!(handler.next(Wait::NoWait).is_none());
    assert!(handler.next(Wait::For(Duration::from_millis(10))).is_none());
}

#[test]
fn cancel_all_empties_and_cancels() {
    let handler = Handler::new();
    let r1 = handler.post(Runnable::unit(|| Ok(()))).unwrap();
    let r2 = handler.post(Runnable::unit(|| Ok(()))).unwrap();
    let r3 = handler
        .post_delayed(Runnable::unit(|| Ok(())), Duration::from_secs(60))
        .unwrap();
    assert_eq!(handler.pending(), 3);

    handler.cancel_all(false);
    assert_eq!(handler.pending(), 0);
    assert!(r1.is_canceled());
    assert!(r2.is_canceled());
    assert!(r3.is_canceled());
}

#[test]
fn cancel_all_can_leave_timed_entries() {
    let handler = Handler::new();
    let immediate = handler.post(Runnable::unit(|| Ok(()))).unwrap();
    let timed = handler
        .post_delayed(Runnable::unit(|| Ok(())), Duration::from_secs(60))
        .unwrap();

    handler.cancel_all(true);
    assert_eq!(handler.pending(), 1);
    assert!(immediate.is_canceled());
    assert!(!timed.is_canceled());
}

#[test]
fn remove_all_does_not_cancel() {
    let handler = Handler::new();
    let request = handler.post(Runnable::unit(|| Ok(()))).unwrap();

    handler.remove_all(false);
    assert_eq!(handler.pending(), 0);
    assert!(!request.is_canceled());
    assert!(request.is_waiting());
}

#[test]
fn get_all_snapshots_in_order() {
    let clock = Arc::new(ManualClock::new(0));
    let handler = Handler::builder().clock(clock).build();
    let a = handler.post(Runnable::unit(|| Ok(()))).unwrap();
    let b = handler.post(Runnable::unit(|| Ok(()))).unwrap();
    let late = handler.post_at(Runnable::unit(|| Ok(())), 100).unwrap();
    let soon = handler.post_at(Runnable::unit(|| Ok(())), 50).unwrap();

    let all = handler.get_all(false);
    let ids: Vec<u64> = all.iter().map(|request| request.id()).collect();
    assert_eq!(ids, vec![a.id(), b.id(), soon.id(), late.id()]);

    let immediate_only = handler.get_all(true);
    assert_eq!(immediate_only.len(), 2);
}

#[test]
fn canceled_requests_are_pruned_by_next() {
    let handler = Handler::new();
    let request = handler.post(Runnable::unit(|| Ok(()))).unwrap();
    request.cancel();

    assert!(handler.next(Wait::NoWait).is_none());
    assert_eq!(handler.pending(), 0);
}
