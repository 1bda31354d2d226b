use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use kv_log_macro::trace;

use crate::error::{Error, Result};
use crate::handler::{Handler, Wait};
use crate::state;

type FailFn = Box<dyn Fn(Option<&Error>) + Send + Sync>;

struct LooperState {
    state: u32,
    stop_requested: bool,
}

/// A driver that repeatedly pulls one ready request from a handler and
/// executes it on the calling thread.
///
/// The looper's own state uses the `NONE`/`STARTED`/`READY` subset of
/// the lifecycle bitfield: `READY` means another [`handle`] pass may
/// run. [`stop`] parks it back to `STARTED` and wakes a pass that is
/// sleeping inside the handler.
///
/// [`handle`]: Looper::handle
/// [`stop`]: Looper::stop
pub struct Looper {
    handler: Arc<Handler>,
    state: Mutex<LooperState>,
    cond: Condvar,
    on_fail: Option<FailFn>,
    timeout: Duration,
}

impl Looper {
    /// Creates a looper driving `handler`.
    pub fn new(handler: Arc<Handler>) -> Looper {
        Looper {
            handler,
            state: Mutex::new(LooperState {
                state: state::NONE,
                stop_requested: false,
            }),
            cond: Condvar::new(),
            on_fail: None,
            timeout: crate::DEFAULT_TIMEOUT,
        }
    }

    /// Installs a callback invoked when a pass fails: the looper was
    /// stopped while a request was in hand (called with `None`), or the
    /// execution machinery panicked (called with the error).
    pub fn on_fail(mut self, callback: impl Fn(Option<&Error>) + Send + Sync + 'static) -> Looper {
        self.on_fail = Some(Box::new(callback));
        self
    }

    /// Sets the per-pass timeout [`run`] uses.
    ///
    /// [`run`]: Looper::run
    pub fn timeout(mut self, timeout: Duration) -> Looper {
        self.timeout = timeout;
        self
    }

    /// The handler this looper drives.
    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    /// The looper's current state bits.
    pub fn state(&self) -> u32 {
        self.state.lock().unwrap().state
    }

    /// Whether another pass may run.
    pub fn is_ready(&self) -> bool {
        state::is_ready(self.state())
    }

    /// Makes the looper ready to handle requests.
    pub fn start(&self) {
        let mut st = self.state.lock().unwrap();
        st.state |= state::READY;
        st.stop_requested = false;
        trace!("looper started");
    }

    /// Parks the looper back to `STARTED` and wakes a pass sleeping in
    /// the handler.
    pub fn stop(&self) {
        let mut st = self.state.lock().unwrap();
        st.state = (st.state | state::STARTED) & !(state::READY & !state::STARTED);
        st.stop_requested = true;
        drop(st);
        self.cond.notify_all();
        self.handler.notify();
        trace!("looper stopped");
    }

    /// Runs one pass: pull the next ready request (sleeping at most
    /// `timeout`) and execute it.
    ///
    /// Returns `true` iff a request was pulled and executed. A timeout,
    /// a looper that is not ready, or a stop observed while waiting all
    /// return `false`; the stop and panic cases also invoke the fail
    /// callback.
    pub fn handle(&self, timeout: Wait) -> bool {
        {
            let mut st = self.state.lock().unwrap();
            if !state::is_ready(st.state) {
                return false;
            }
            // Park back to STARTED while this pass drains.
            st.state &= !(state::READY & !state::STARTED);
        }

        let request = self.handler.next(timeout);
        let stopped = self.state.lock().unwrap().stop_requested;

        let mut failure: Option<Option<Error>> = None;
        let mut handled = false;
        match request {
            None => {}
            Some(_) if stopped => failure = Some(None),
            Some(request) => match panic::catch_unwind(AssertUnwindSafe(|| request.execute())) {
                Ok(_) => handled = true,
                Err(payload) => failure = Some(Some(Error::from_panic(payload))),
            },
        }

        {
            let mut st = self.state.lock().unwrap();
            if state::is_started(st.state) && !st.stop_requested && !self.handler.is_closed() {
                st.state |= state::READY;
            }
        }

        if let Some(err) = failure {
            if let Some(callback) = &self.on_fail {
                callback(err.as_ref());
            }
            return false;
        }
        handled
    }

    /// Loops [`handle`] with the configured timeout until stopped or the
    /// handler closes.
    ///
    /// [`handle`]: Looper::handle
    pub fn run(&self) {
        while self.is_ready() {
            self.handle(Wait::For(self.timeout));
        }
    }

    /// Starts `looper` and drives [`run`] on a dedicated thread.
    ///
    /// [`run`]: Looper::run
    pub fn start_on_thread(looper: Arc<Looper>) -> Result<thread::JoinHandle<()>> {
        looper.start();
        thread::Builder::new()
            .name("taskloop-looper".to_string())
            .spawn(move || looper.run())
            .map_err(Error::user)
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("state", &format_args!("{:#010x}", self.state()))
            .field("timeout", &self.timeout)
            .finish()
    }
}
