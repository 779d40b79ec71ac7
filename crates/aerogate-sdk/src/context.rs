//! Process-scoped execution context: owns a scheduler and arbitrates
//! run/stop lifecycle, including OS-signal-triggered shutdown.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use aerogate_core::{Callback, Error, Outcome};
use tokio::signal::unix::signal;
pub use tokio::signal::unix::SignalKind;

use crate::client::{ClientConfig, RestClient};
use crate::schedule::{LoopScheduler, PoolScheduler, Scheduler, Task};

/// Terminal result of a context run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    Error,
}

impl ReturnCode {
    /// Process exit code: 0 on success, 1 otherwise.
    pub fn exit_code(self) -> i32 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::Error => 1,
        }
    }
}

/// Scheduler backend selection for [`Context::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerBackend {
    /// Worker thread pool sized by tokio's defaults.
    Pool,
    /// Worker thread pool with an explicit worker count.
    PoolWithWorkers(usize),
    /// Single cooperative loop bound to the thread calling `run`.
    CooperativeLoop,
}

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Owner of the scheduler and the overall run/stop lifecycle.
///
/// Lifecycle is `created -> running -> stopped(code)` with no transition
/// out of `stopped`; a Context cannot be restarted.
pub struct Context {
    scheduler: Arc<dyn Scheduler>,
    state: AtomicU8,
    code: AtomicU8,
}

impl Context {
    /// Create a context, validating that the chosen scheduler backend can
    /// be initialized. Failure here never enters the run loop.
    pub fn create(backend: SchedulerBackend) -> Outcome<Arc<Context>, Error> {
        let scheduler: Arc<dyn Scheduler> = match backend {
            SchedulerBackend::Pool => match PoolScheduler::new() {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    return Outcome::error(Error::transport_caused_by(
                        "worker pool scheduler initialization failed",
                        e,
                    ))
                }
            },
            SchedulerBackend::PoolWithWorkers(workers) => {
                match PoolScheduler::with_workers(workers) {
                    Ok(s) => Arc::new(s),
                    Err(e) => {
                        return Outcome::error(Error::transport_caused_by(
                            "worker pool scheduler initialization failed",
                            e,
                        ))
                    }
                }
            }
            SchedulerBackend::CooperativeLoop => match LoopScheduler::new() {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    return Outcome::error(Error::transport_caused_by(
                        "cooperative loop scheduler initialization failed",
                        e,
                    ))
                }
            },
        };

        Outcome::value(Arc::new(Context {
            scheduler,
            state: AtomicU8::new(STATE_CREATED),
            code: AtomicU8::new(0),
        }))
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Enqueue a task on the owned scheduler.
    pub fn post(&self, task: Task) {
        self.scheduler.post(task);
    }

    /// Asynchronously build a remote client bound to `config` and report
    /// it through `cb`. Fails on malformed configuration.
    pub fn create_client(self: &Arc<Self>, config: ClientConfig, cb: Callback<Arc<RestClient>>) {
        self.post(Box::pin(async move {
            let outcome: Outcome<_, Error> = RestClient::create(config).await.map(Arc::new).into();
            cb(outcome);
        }));
    }

    /// Run the scheduler until stopped. Blocks the calling thread and
    /// returns the terminal code.
    pub fn run(&self) -> ReturnCode {
        if self
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.scheduler.run();
        }
        self.return_code()
    }

    /// Run the scheduler and map any signal in `signals` to `handler`.
    /// The handler is expected to call [`Context::stop`]; `exec` then
    /// returns the terminal code.
    pub fn exec<F>(self: &Arc<Self>, signals: &[SignalKind], handler: F) -> ReturnCode
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for kind in signals {
            let kind = *kind;
            let handler = Arc::clone(&handler);
            self.post(Box::pin(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        while stream.recv().await.is_some() {
                            tracing::info!(signal = kind.as_raw_value(), "caught signal");
                            handler(kind.as_raw_value());
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to install signal handler");
                    }
                }
            }));
        }
        self.run()
    }

    /// One-shot stop; a second call has no effect. Transitions the
    /// context to its terminal state.
    pub fn stop(&self, code: ReturnCode) {
        let previous = self.state.swap(STATE_STOPPED, Ordering::SeqCst);
        if previous == STATE_STOPPED {
            return;
        }
        self.code.store(code.exit_code() as u8, Ordering::SeqCst);
        self.scheduler.stop();
    }

    pub fn stop_with_error(&self) {
        self.stop(ReturnCode::Error);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_STOPPED
    }

    fn return_code(&self) -> ReturnCode {
        match self.code.load(Ordering::SeqCst) {
            0 => ReturnCode::Success,
            _ => ReturnCode::Error,
        }
    }
}
