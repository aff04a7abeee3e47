//! Scheduling Primitives
//!
//! "Run when idle, else after a fixed delay" and fixed-period repetition,
//! both returning a cancellable handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

// == Idle Signal ==
/// Raised once by the host when startup work is done.
#[derive(Debug, Clone)]
pub struct IdleSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for IdleSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Marks the host idle and wakes every waiter.
    pub fn notify_idle(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_idle(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`notify_idle`](Self::notify_idle) has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

// == Scheduled Task ==
/// Handle to a scheduled background task.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Stops the task. Safe to call more than once.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the task to end, whether it completed or was cancelled.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Runs `task` once the host is idle, or after `fallback` if that comes first.
pub fn run_when_idle<F>(idle: &IdleSignal, fallback: Duration, task: F) -> ScheduledTask
where
    F: Future<Output = ()> + Send + 'static,
{
    let idle = idle.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = idle.wait() => debug!("host idle, running deferred task"),
            _ = tokio::time::sleep(fallback) => {
                debug!("idle fallback elapsed, running deferred task");
            }
        }
        task.await;
    });
    ScheduledTask { handle }
}

/// Runs `tick` every `period`, first after one full period, until cancelled.
pub fn run_every<F, Fut>(period: Duration, tick: F) -> ScheduledTask
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            tick().await;
        }
    });
    ScheduledTask { handle }
}
