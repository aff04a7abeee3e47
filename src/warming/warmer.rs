//! Cache Warmer
//!
//! Registry of keys to preload. Immediate tasks run at startup, deferred
//! tasks once the host is idle, and a periodic refresh reloads everything.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, SetOptions};
use crate::fetch::Loader;
use crate::warming::schedule::{run_every, run_when_idle, IdleSignal, ScheduledTask};

// == Warm Phase ==
/// When a registered task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmPhase {
    /// At startup, concurrently
    Immediate,
    /// Once the host is idle
    Deferred,
}

#[derive(Clone)]
struct WarmTask {
    key: String,
    phase: WarmPhase,
    options: SetOptions,
    loader: Loader<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Warmed,
    Skipped,
    Failed,
}

// == Warm Report ==
/// Tally of one warming pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub warmed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WarmReport {
    fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Warmed => report.warmed += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        report
    }

    pub fn total(&self) -> usize {
        self.warmed + self.skipped + self.failed
    }
}

// == Cache Warmer ==
/// Preloads registered keys into a [`CacheManager`].
///
/// Cloning is cheap; clones share the cache and copy the registry.
#[derive(Clone)]
pub struct CacheWarmer {
    cache: Arc<CacheManager>,
    tasks: Vec<WarmTask>,
}

impl std::fmt::Debug for CacheWarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("keys", &self.keys())
            .finish()
    }
}

impl CacheWarmer {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self {
            cache,
            tasks: Vec::new(),
        }
    }

    /// Registers `key` to be loaded by `loader` in the given phase.
    ///
    /// Registering a key twice replaces the earlier task.
    pub fn register<T, F, Fut>(
        &mut self,
        phase: WarmPhase,
        key: impl Into<String>,
        options: SetOptions,
        loader: F,
    ) -> &mut Self
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = key.into();
        let loader: Loader<Value> = Arc::new(move || {
            loader()
                .map(|result| result.and_then(|data| Ok(serde_json::to_value(data)?)))
                .boxed()
        });

        self.tasks.retain(|task| task.key != key);
        self.tasks.push(WarmTask {
            key,
            phase,
            options,
            loader,
        });
        self
    }

    pub fn keys(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.key.as_str()).collect()
    }

    /// Loads every immediate key that is not already cached.
    pub async fn warm_immediate(&self) -> WarmReport {
        let report = self.warm_phase(WarmPhase::Immediate).await;
        info!(
            warmed = report.warmed,
            skipped = report.skipped,
            failed = report.failed,
            "immediate cache warming complete"
        );
        report
    }

    /// Loads every deferred key that is not already cached, right now.
    pub async fn warm_deferred(&self) -> WarmReport {
        let report = self.warm_phase(WarmPhase::Deferred).await;
        info!(
            warmed = report.warmed,
            skipped = report.skipped,
            failed = report.failed,
            "deferred cache warming complete"
        );
        report
    }

    /// Runs [`warm_deferred`](Self::warm_deferred) once the host is idle,
    /// or after `fallback` at the latest.
    pub fn schedule_deferred(&self, idle: &IdleSignal, fallback: Duration) -> ScheduledTask {
        let warmer = self.clone();
        run_when_idle(idle, fallback, async move {
            warmer.warm_deferred().await;
        })
    }

    /// Deletes and reloads every registered key, cached or not.
    pub async fn refresh_stale_cache(&self) -> WarmReport {
        let outcomes = join_all(self.tasks.iter().map(|task| async move {
            self.cache.delete(&task.key, task.options.storage).await;
            self.load(task).await
        }))
        .await;

        let report = WarmReport::from_outcomes(&outcomes);
        info!(
            refreshed = report.warmed,
            failed = report.failed,
            "cache refresh complete"
        );
        report
    }

    /// Calls [`refresh_stale_cache`](Self::refresh_stale_cache) every `interval`.
    pub fn start_periodic_refresh(&self, interval: Duration) -> ScheduledTask {
        info!(interval_secs = interval.as_secs(), "starting periodic cache refresh");
        let warmer = self.clone();
        run_every(interval, move || {
            let warmer = warmer.clone();
            async move {
                warmer.refresh_stale_cache().await;
            }
        })
    }

    async fn warm_phase(&self, phase: WarmPhase) -> WarmReport {
        let outcomes = join_all(
            self.tasks
                .iter()
                .filter(|task| task.phase == phase)
                .map(|task| self.warm(task)),
        )
        .await;
        WarmReport::from_outcomes(&outcomes)
    }

    async fn warm(&self, task: &WarmTask) -> Outcome {
        if let Some(meta) = self.cache.metadata(&task.key, task.options.storage).await {
            debug!(
                key = %task.key,
                ttl_remaining_ms = ?meta.ttl_remaining_ms(),
                "already cached, skipping warm"
            );
            return Outcome::Skipped;
        }
        self.load(task).await
    }

    async fn load(&self, task: &WarmTask) -> Outcome {
        match (task.loader)().await {
            Ok(data) => {
                if self.cache.set(&task.key, &data, task.options).await {
                    debug!(key = %task.key, "warmed");
                    Outcome::Warmed
                } else {
                    Outcome::Failed
                }
            }
            Err(e) => {
                warn!(key = %task.key, error = %e, "warming loader failed");
                Outcome::Failed
            }
        }
    }
}
