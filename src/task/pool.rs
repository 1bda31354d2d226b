//! The process-wide thread pool behind the pool-backed bindings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use lazy_static::lazy_static;

use crate::request::Job;
use crate::task::dispatch::Executor;
use crate::utils::{abort_on_panic, random};

const MAX_THREADS: u64 = 10_000;

static DYNAMIC_THREAD_COUNT: AtomicU64 = AtomicU64::new(0);

struct Pool {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

lazy_static! {
    static ref POOL: Pool = {
        for _ in 0..num_cpus::get().max(1) {
            thread::Builder::new()
                .name("taskloop-pool-driver".to_string())
                .spawn(|| abort_on_panic(|| {
                    for job in &POOL.receiver {
                        job();
                    }
                }))
                .expect("cannot start a thread driving pool jobs");
        }

        // An unbuffered channel lets the kernel scheduler act as the
        // queue: a job is handed straight to a waiting thread, and a
        // failed try_send is the signal to grow the pool.
        let (sender, receiver) = bounded(0);
        Pool { sender, receiver }
    };
}

// Create up to MAX_THREADS dynamic worker threads. Dynamic threads
// terminate themselves if they receive no work for one to ten seconds,
// staggered so they don't all exit at once.
fn maybe_create_another_thread() {
    let workers = DYNAMIC_THREAD_COUNT.load(Ordering::Relaxed);
    if workers >= MAX_THREADS {
        return;
    }

    let rand_sleep_ms = u64::from(random(10_000));

    thread::Builder::new()
        .name("taskloop-pool-driver-dynamic".to_string())
        .spawn(move || {
            let wait_limit = Duration::from_millis(1000 + rand_sleep_ms);

            DYNAMIC_THREAD_COUNT.fetch_add(1, Ordering::Relaxed);
            while let Ok(job) = POOL.receiver.recv_timeout(wait_limit) {
                abort_on_panic(job);
            }
            DYNAMIC_THREAD_COUNT.fetch_sub(1, Ordering::Relaxed);
        })
        .expect("cannot start a dynamic thread driving pool jobs");
}

// Enqueue a job, attempting a nonblocking hand-off first and spinning up
// another worker thread if no thread was ready to accept it.
pub(crate) fn schedule(job: Job) {
    if let Err(err) = POOL.sender.try_send(job) {
        maybe_create_another_thread();
        POOL.sender.send(err.into_inner()).unwrap();
    }
}

/// The process-wide dynamic thread pool, usable wherever an [`Executor`]
/// is expected.
#[derive(Debug, Default)]
pub struct SharedPool;

impl Executor for SharedPool {
    fn execute(&self, job: Job) {
        schedule(job);
    }
}
