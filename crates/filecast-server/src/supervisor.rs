//! Fault barriers around worker bodies.
//!
//! Every long-running worker (hub loop, session pumps, directory watcher,
//! HTTP listener) runs through [`supervise`]. A panic inside the worker is
//! caught, logged with the worker's name and counted; it never unwinds into
//! the caller or into other workers.
//!
//! A fault in the hub loop is reported separately: nothing restarts that
//! loop, so every later broadcast is lost.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use metrics::counter;
use tracing::error;

use crate::metrics::WORKER_FAULTS_TOTAL;

/// Worker kinds that run under a fault barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    /// The hub event loop.
    Hub,
    /// A session's read obligation.
    SessionReader,
    /// A session's write obligation.
    SessionWriter,
    /// The directory watch loop.
    Watcher,
    /// The HTTP accept loop.
    Listener,
}

impl Worker {
    /// Short name used in logs and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::SessionReader => "session_reader",
            Self::SessionWriter => "session_writer",
            Self::Watcher => "watcher",
            Self::Listener => "listener",
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A worker body panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFault {
    /// Which worker faulted.
    pub worker: Worker,
    /// Panic payload rendered as text.
    pub message: String,
}

/// Run `fut` to completion, converting a panic into a logged [`WorkerFault`].
pub async fn supervise<F>(worker: Worker, fut: F) -> Result<F::Output, WorkerFault>
where
    F: Future,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            counter!(WORKER_FAULTS_TOTAL, "worker" => worker.name()).increment(1);
            if worker == Worker::Hub {
                error!(
                    worker = worker.name(),
                    panic = %message,
                    fatal = true,
                    "hub event loop faulted, broadcasting is halted"
                );
            } else {
                error!(worker = worker.name(), panic = %message, "worker faulted");
            }
            Err(WorkerFault { worker, message })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
