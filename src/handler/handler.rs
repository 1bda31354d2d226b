use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use kv_log_macro::trace;

use crate::clock::{Clock, SystemClock};
use crate::collections::Stack;
use crate::error::{Error, Result};
use crate::request::{Request, Runnable};

/// How long a drainer may sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Sleep until woken.
    Forever,
    /// Do not sleep at all.
    NoWait,
    /// Sleep at most this long.
    For(Duration),
}

impl Wait {
    fn cap(self, limit: Duration) -> Wait {
        match self {
            Wait::NoWait => Wait::NoWait,
            Wait::Forever => Wait::For(limit),
            Wait::For(timeout) => Wait::For(timeout.min(limit)),
        }
    }
}

/// Configures and builds a [`Handler`].
pub struct Builder {
    clock: Arc<dyn Clock>,
    retry_timeout: Duration,
}

impl Builder {
    /// Creates a builder with the wall clock and the default retry
    /// timeout.
    pub fn new() -> Builder {
        Builder {
            clock: Arc::new(SystemClock),
            retry_timeout: crate::RETRY_TIMEOUT,
        }
    }

    /// Uses `clock` as the time source for delayed work.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Builder {
        self.clock = clock;
        self
    }

    /// Caps how long [`Handler::next`] sleeps when a request refused
    /// readiness and should be revisited soon.
    pub fn retry_timeout(mut self, timeout: Duration) -> Builder {
        self.retry_timeout = timeout;
        self
    }

    /// Builds the handler.
    pub fn build(self) -> Arc<Handler> {
        Arc::new(Handler {
            clock: self.clock,
            retry_timeout: self.retry_timeout,
            busy: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                immediate: Stack::new(),
                timed: Vec::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("retry_timeout", &self.retry_timeout)
            .finish()
    }
}

struct TimedEntry {
    request: Arc<Request>,
    at: i64,
}

struct Inner {
    immediate: Stack<Arc<Request>>,
    /// Sorted by due time descending, so the next-due entry is at the
    /// end; ties break LIFO (the later post sits closer to the end).
    timed: Vec<TimedEntry>,
    closed: bool,
}

/// A dual-queue scheduler.
///
/// Immediate posts go onto a LIFO stack (the most recent post runs
/// first); delayed posts go into a queue ordered by due time. Posting
/// starts the request and wakes sleeping drainers. [`next`] hands out
/// one ready request at a time under a cooperative single-drainer
/// discipline: a `busy` flag lets concurrent callers bail out to a wait
/// without contending the queues.
///
/// A closed handler rejects posts and returns `None` from `next`;
/// closing is absorbing.
///
/// # Examples
///
/// ```
/// use taskloop::{Handler, Runnable, Wait};
///
/// let handler = Handler::new();
/// let request = handler.post(Runnable::unit(|| Ok(()))).unwrap();
///
/// let next = handler.next(Wait::NoWait).unwrap();
/// assert_eq!(next.id(), request.id());
/// assert!(next.is_ready());
/// ```
///
/// [`next`]: Handler::next
pub struct Handler {
    clock: Arc<dyn Clock>,
    retry_timeout: Duration,
    busy: AtomicBool,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Handler {
    /// Creates a handler on the wall clock.
    pub fn new() -> Arc<Handler> {
        Builder::new().build()
    }

    /// Starts configuring a handler.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Posts a runnable for immediate execution. The wrapped request is
    /// started and returned.
    pub fn post(&self, runnable: impl Into<Runnable>) -> Result<Arc<Request>> {
        self.enqueue(runnable.into(), None)
    }

    /// Posts a runnable to run no earlier than `delay` from now.
    pub fn post_delayed(
        &self,
        runnable: impl Into<Runnable>,
        delay: Duration,
    ) -> Result<Arc<Request>> {
        let at = self.clock.now() + delay.as_millis() as i64;
        self.enqueue(runnable.into(), Some(at))
    }

    /// Posts a runnable to run no earlier than the absolute time `at`
    /// (milliseconds since the epoch, per this handler's clock).
    pub fn post_at(&self, runnable: impl Into<Runnable>, at: i64) -> Result<Arc<Request>> {
        self.enqueue(runnable.into(), Some(at))
    }

    fn enqueue(&self, runnable: Runnable, at: Option<i64>) -> Result<Arc<Request>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::Closed("handler"));
        }
        let request = runnable.into_request();
        request.start();
        match at {
            None => inner.immediate.push(request.clone())?,
            Some(at) => {
                let index = inner.timed.partition_point(|entry| entry.at >= at);
                inner.timed.insert(
                    index,
                    TimedEntry {
                        request: request.clone(),
                        at,
                    },
                );
            }
        }
        trace!("post", { id: request.id(), timed: at.is_some() });
        drop(inner);
        self.cond.notify_all();
        Ok(request)
    }

    /// A snapshot of the queued requests: immediate entries oldest
    /// first, then (unless excluded) timed entries soonest first.
    pub fn get_all(&self, exclude_timed: bool) -> Vec<Arc<Request>> {
        let inner = self.inner.lock().unwrap();
        let mut all: Vec<_> = inner.immediate.iter().cloned().collect();
        if !exclude_timed {
            all.extend(inner.timed.iter().rev().map(|entry| entry.request.clone()));
        }
        all
    }

    /// Empties the queues and cancels every drained request. The queues
    /// are cleared before any cancellation runs, so a concurrent
    /// [`next`] cannot hand the same request out.
    ///
    /// [`next`]: Handler::next
    pub fn cancel_all(&self, exclude_timed: bool) {
        for request in self.drain(exclude_timed) {
            request.cancel();
        }
    }

    /// Empties the queues without canceling the drained requests.
    pub fn remove_all(&self, exclude_timed: bool) {
        self.drain(exclude_timed);
    }

    fn drain(&self, exclude_timed: bool) -> Vec<Arc<Request>> {
        let mut inner = self.inner.lock().unwrap();
        let mut drained: Vec<_> = inner.immediate.iter().cloned().collect();
        inner.immediate.clear();
        if !exclude_timed {
            drained.extend(inner.timed.drain(..).rev().map(|entry| entry.request));
        }
        drained
    }

    /// Number of queued requests.
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.immediate.len() + inner.timed.len()
    }

    /// Whether the handler was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Closes the handler. Posts fail and drainers return `None` from
    /// here on; sleepers are woken.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.cond.notify_all();
        trace!("handler closed");
    }

    /// Wakes every thread sleeping in [`next`].
    ///
    /// [`next`]: Handler::next
    pub fn notify(&self) {
        self.cond.notify_all();
    }

    /// Removes and returns the next request that accepts readiness, or
    /// `None` once `timeout` elapses.
    ///
    /// Due timed entries are tried before the immediate stack; dead
    /// entries (no longer started-and-waiting) are pruned on the way. A
    /// request that refuses readiness caps the sleep at the retry
    /// timeout — timed refusals are dropped, immediate refusals go back
    /// on top of the stack for the retry to revisit. After any sleep one
    /// more non-blocking pass runs before giving up.
    pub fn next(&self, timeout: Wait) -> Option<Arc<Request>> {
        // Another drainer is inside the critical section; skip straight
        // to the wait.
        if self.busy.load(Ordering::SeqCst) {
            return self.wait_pass(timeout);
        }
        let mut inner = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(_) => return self.wait_pass(timeout),
        };
        if inner.closed {
            return None;
        }
        self.busy.store(true, Ordering::SeqCst);

        let mut effective = timeout;
        let mut retry = false;

        // Timed branch: prune dead tails, surface the next due entry.
        loop {
            let now = self.clock.now();
            let remaining = match inner.timed.last() {
                None => break,
                Some(entry) => {
                    if entry.request.is_started() && entry.request.is_waiting() {
                        Some(entry.at - now)
                    } else {
                        None
                    }
                }
            };
            match remaining {
                None => {
                    inner.timed.pop();
                }
                Some(remaining) if remaining > 0 => {
                    effective = effective.cap(Duration::from_millis(remaining as u64));
                    break;
                }
                Some(_) => {
                    if let Some(entry) = inner.timed.pop() {
                        if entry.request.ready() {
                            self.busy.store(false, Ordering::SeqCst);
                            trace!("next", { id: entry.request.id(), timed: true });
                            return Some(entry.request);
                        }
                        retry = true;
                    }
                }
            }
        }

        // Immediate branch: LIFO, skipping dead entries.
        loop {
            match inner.immediate.pop() {
                None => break,
                Some(request) => {
                    if !request.is_started() || !request.is_waiting() {
                        continue;
                    }
                    if request.ready() {
                        self.busy.store(false, Ordering::SeqCst);
                        trace!("next", { id: request.id(), timed: false });
                        return Some(request);
                    }
                    // The pop freed this slot, so the push cannot fail.
                    let _ = inner.immediate.push(request);
                    retry = true;
                    break;
                }
            }
        }

        if retry {
            effective = effective.cap(self.retry_timeout);
        }
        self.busy.store(false, Ordering::SeqCst);

        match effective {
            Wait::NoWait => None,
            Wait::Forever => {
                let guard = self.cond.wait(inner).unwrap();
                drop(guard);
                self.next(Wait::NoWait)
            }
            Wait::For(timeout) => {
                let (guard, _) = self.cond.wait_timeout(inner, timeout).unwrap();
                drop(guard);
                self.next(Wait::NoWait)
            }
        }
    }

    /// The wait taken when the critical section was not acquired: sleep
    /// for a pulse, then take one non-blocking pass.
    fn wait_pass(&self, timeout: Wait) -> Option<Arc<Request>> {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
            return None;
        }
        match timeout {
            Wait::NoWait => return None,
            Wait::Forever => {
                let guard = self.cond.wait(inner).unwrap();
                drop(guard);
            }
            Wait::For(timeout) => {
                let (guard, _) = self.cond.wait_timeout(inner, timeout).unwrap();
                drop(guard);
            }
        }
        self.next(Wait::NoWait)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Handler")
            .field("immediate", &inner.immediate.len())
            .field("timed", &inner.timed.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn timed_queue_keeps_next_due_at_the_end() {
        let clock = Arc::new(ManualClock::new(0));
        let handler = Handler::builder().clock(clock).build();

        handler.post_at(Runnable::unit(|| Ok(())), 50).unwrap();
        handler.post_at(Runnable::unit(|| Ok(())), 10).unwrap();
        handler.post_at(Runnable::unit(|| Ok(())), 30).unwrap();

        let inner = handler.inner.lock().unwrap();
        let order: Vec<i64> = inner.timed.iter().map(|entry| entry.at).collect();
        assert_eq!(order, vec![50, 30, 10]);
    }

    #[test]
    fn timed_ties_break_lifo() {
        let clock = Arc::new(ManualClock::new(0));
        let handler = Handler::builder().clock(clock.clone()).build();

        let first = handler.post_at(Runnable::unit(|| Ok(())), 10).unwrap();
        let second = handler.post_at(Runnable::unit(|| Ok(())), 10).unwrap();

        clock.advance(20);
        let next = handler.next(Wait::NoWait).unwrap();
        assert_eq!(next.id(), second.id());
        let next = handler.next(Wait::NoWait).unwrap();
        assert_eq!(next.id(), first.id());
    }
}
