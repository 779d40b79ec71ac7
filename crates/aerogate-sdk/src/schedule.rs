//! Deferred execution of work units across pluggable backends.
//!
//! Two backends are provided: [`PoolScheduler`] runs tasks on a worker
//! thread pool, [`LoopScheduler`] runs them cooperatively on the single
//! thread that calls [`Scheduler::run`]. Both deliver tasks posted from
//! one thread in submission order; tasks posted concurrently from
//! different threads are not ordered relative to each other.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::runtime;
use tokio::sync::watch;

/// A deferred unit of work. Has no identity beyond its closure.
pub type Task = BoxFuture<'static, ()>;

/// Abstraction over "run this unit of work later".
pub trait Scheduler: Send + Sync {
    /// Enqueue work for later execution. Never blocks the caller.
    fn post(&self, task: Task);

    /// Execute posted tasks until [`Scheduler::stop`] is called.
    /// Blocks the calling thread.
    fn run(&self);

    /// Request drain-and-exit. Idempotent; safe from any thread.
    fn stop(&self);
}

type FaultHandler = Box<dyn Fn(&str) + Send + Sync>;

static FAULT_HANDLER: OnceLock<FaultHandler> = OnceLock::new();

/// Install a process-wide handler for tasks that panic. A panicking task
/// is reported here instead of being propagated to the poster; this is
/// the recovery boundary of the scheduling layer.
///
/// Returns false if a handler was already installed.
pub fn set_fault_handler(handler: impl Fn(&str) + Send + Sync + 'static) -> bool {
    FAULT_HANDLER.set(Box::new(handler)).is_ok()
}

fn report_fault(payload: Box<dyn Any + Send>) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked with non-string payload".to_string());

    match FAULT_HANDLER.get() {
        Some(handler) => handler(&message),
        None => tracing::error!(fault = %message, "scheduled task panicked"),
    }
}

/// Wrap a task so a panic is routed to the fault handler.
fn guarded(task: Task) -> impl std::future::Future<Output = ()> + Send {
    AssertUnwindSafe(task).catch_unwind().map(|result| {
        if let Err(payload) = result {
            report_fault(payload);
        }
    })
}

/// Worker-thread-pool backend.
pub struct PoolScheduler {
    runtime: runtime::Runtime,
    stop_tx: watch::Sender<bool>,
}

impl PoolScheduler {
    pub fn new() -> io::Result<Self> {
        let rt = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("aerogate-worker")
            .build()?;
        Ok(Self::from_runtime(rt))
    }

    pub fn with_workers(workers: usize) -> io::Result<Self> {
        let rt = runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(workers)
            .thread_name("aerogate-worker")
            .build()?;
        Ok(Self::from_runtime(rt))
    }

    fn from_runtime(runtime: runtime::Runtime) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self { runtime, stop_tx }
    }
}

impl Scheduler for PoolScheduler {
    fn post(&self, task: Task) {
        self.runtime.spawn(guarded(task));
    }

    fn run(&self) {
        let mut stopped = self.stop_tx.subscribe();
        self.runtime.block_on(async move {
            loop {
                if *stopped.borrow() {
                    break;
                }
                if stopped.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Cooperative single-thread backend. Posted tasks only make progress
/// while [`Scheduler::run`] blocks the owning thread, so they never run
/// concurrently with each other or with that thread.
pub struct LoopScheduler {
    runtime: runtime::Runtime,
    stop_tx: watch::Sender<bool>,
}

impl LoopScheduler {
    pub fn new() -> io::Result<Self> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (stop_tx, _) = watch::channel(false);
        Ok(Self { runtime, stop_tx })
    }
}

impl Scheduler for LoopScheduler {
    fn post(&self, task: Task) {
        self.runtime.spawn(guarded(task));
    }

    fn run(&self) {
        let mut stopped = self.stop_tx.subscribe();
        self.runtime.block_on(async move {
            loop {
                if *stopped.borrow() {
                    break;
                }
                if stopped.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Scheduler that spawns onto an already-running tokio runtime. Used by
/// components that live inside a host application's runtime instead of
/// owning one.
pub struct HandleScheduler {
    handle: runtime::Handle,
}

impl HandleScheduler {
    pub fn new(handle: runtime::Handle) -> Self {
        Self { handle }
    }

    pub fn current() -> Self {
        Self {
            handle: runtime::Handle::current(),
        }
    }
}

impl Scheduler for HandleScheduler {
    fn post(&self, task: Task) {
        self.handle.spawn(guarded(task));
    }

    fn run(&self) {}

    fn stop(&self) {}
}
