//! Named background tasks sharing one cancellation token
//!
//! Periodic tasks sleep for their interval, run one iteration, and repeat
//! until the token is cancelled. A `Transient` error is logged and the task
//! keeps ticking; a `Fatal` error records the cause, cancels the token and so
//! tears every other task down too.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    Transient(String),
    Fatal(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Transient(msg) => write!(f, "transient: {}", msg),
            TaskError::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for TaskError {}

/// First fatal failure observed by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub task: &'static str,
    pub cause: String,
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task '{}' failed: {}", self.task, self.cause)
    }
}

impl std::error::Error for FatalError {}

pub struct Scheduler {
    cancel: CancellationToken,
    fatal: Arc<Mutex<Option<FatalError>>>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            fatal: Arc::new(Mutex::new(None)),
            handles: Vec::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Run `tick` every `period` until cancelled. A zero period disables the task.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        if period.is_zero() {
            log::debug!("⏸️  Periodic task '{}' disabled (zero interval)", name);
            return;
        }

        let cancel = self.cancel.clone();
        let fatal = Arc::clone(&self.fatal);

        let handle = tokio::spawn(async move {
            log::info!("⏰ Starting {} task (interval: {}ms)", name, period.as_millis());

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }

                match tick().await {
                    Ok(()) => {}
                    Err(TaskError::Transient(msg)) => {
                        log::warn!("⚠️  {} iteration failed: {}", name, msg);
                    }
                    Err(TaskError::Fatal(msg)) => {
                        record_fatal(&fatal, &cancel, name, msg);
                        break;
                    }
                }
            }

            log::debug!("🛑 {} task stopped", name);
        });

        self.handles.push((name, handle));
    }

    /// Run a long-lived task; returning `Ok` ends it quietly
    pub fn spawn<Fut>(&mut self, name: &'static str, task: Fut)
    where
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let fatal = Arc::clone(&self.fatal);

        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => log::debug!("🛑 {} task finished", name),
                Err(TaskError::Transient(msg)) => {
                    log::warn!("⚠️  {} task ended with error: {}", name, msg);
                }
                Err(TaskError::Fatal(msg)) => record_fatal(&fatal, &cancel, name, msg),
            }
        });

        self.handles.push((name, handle));
    }

    /// Resolves once the token is cancelled (by a fatal task or externally)
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn fatal_error(&self) -> Option<FatalError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel every task, wait for all of them, and report the first fatal error
    pub async fn shutdown(self) -> Option<FatalError> {
        self.cancel.cancel();

        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                log::error!("❌ {} task panicked: {}", name, e);
            }
        }

        let fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner).take();
        fatal
    }
}

fn record_fatal(
    slot: &Mutex<Option<FatalError>>,
    cancel: &CancellationToken,
    task: &'static str,
    cause: String,
) {
    log::error!("❌ {} task failed fatally: {}", task, cause);
    {
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(FatalError { task, cause });
        }
    }
    cancel.cancel();
}
