//! API Query
//!
//! Runs a loader against the cache manager according to a fetch strategy and
//! publishes `{data, loading, error, is_stale}` to any number of observers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{lock, CacheManager};
use crate::fetch::{FetchOptions, Strategy};

/// Type-erased loader producing fresh data.
pub type Loader<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Loader failure as exposed to observers.
pub type FetchError = Arc<anyhow::Error>;

type SharedLoad<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Bounds every payload handled by a query must satisfy.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

// == Fetch State ==
/// What a consumer renders.
#[derive(Debug, Clone)]
pub struct FetchState<T> {
    pub data: Option<T>,
    /// True only while a foreground fetch is running
    pub loading: bool,
    pub error: Option<FetchError>,
    /// Data shown is cached and may be outdated
    pub is_stale: bool,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_stale: false,
        }
    }
}

impl<T> FetchState<T> {
    fn show(&mut self, data: T, stale: bool) {
        self.data = Some(data);
        self.is_stale = stale;
        self.error = None;
    }
}

// == Api Query ==
/// One consumer's view of a cached resource.
///
/// Cloning is cheap and every clone drives the same query. At most one loader
/// call is in flight per query; concurrent triggers join it.
pub struct ApiQuery<T> {
    inner: Arc<QueryInner<T>>,
}

struct QueryInner<T> {
    cache: Arc<CacheManager>,
    key: String,
    loader: Loader<T>,
    options: FetchOptions,
    state: watch::Sender<FetchState<T>>,
    inflight: Mutex<Option<SharedLoad<T>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Cleared on unmount; results arriving afterwards are dropped
    live: AtomicBool,
    enabled: AtomicBool,
    /// Set once the initial fetch has run
    started: AtomicBool,
}

impl<T> Clone for ApiQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload> ApiQuery<T> {
    // == Constructor ==
    /// Creates a query. Nothing runs until [`mount`](Self::mount).
    pub fn new<F, Fut>(
        cache: Arc<CacheManager>,
        key: impl Into<String>,
        loader: F,
        options: FetchOptions,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let loader: Loader<T> = Arc::new(move || loader().boxed());
        let (state, _) = watch::channel(FetchState::default());

        Self {
            inner: Arc::new(QueryInner {
                cache,
                key: key.into(),
                loader,
                options,
                state,
                inflight: Mutex::new(None),
                background: Mutex::new(Vec::new()),
                live: AtomicBool::new(true),
                enabled: AtomicBool::new(options.enabled),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn options(&self) -> &FetchOptions {
        &self.inner.options
    }

    /// Current state snapshot.
    pub fn state(&self) -> FetchState<T> {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.inner.state.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    // == Lifecycle ==
    /// Runs the initial fetch if the query is enabled.
    pub async fn mount(&self) {
        if self.is_enabled() {
            self.activate().await;
        }
    }

    /// Enables or disables the query. The first enable runs the initial fetch.
    pub async fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.activate().await;
        }
    }

    async fn activate(&self) {
        if !self.is_live() || self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.fetch().await;
        if self.inner.options.refetch_on_mount {
            self.revalidate_if_stale().await;
        }
    }

    /// Marks the query dead. Loads still finish and fill the cache, but their
    /// results are no longer published.
    pub fn unmount(&self) {
        self.inner.live.store(false, Ordering::SeqCst);
        debug!(key = %self.inner.key, "query unmounted");
    }

    // == Fetch ==
    /// Runs the configured strategy in the foreground.
    pub async fn fetch(&self) {
        self.run(self.inner.options.strategy).await;
    }

    /// Forces a network load and overwrites the cached entry.
    pub async fn refetch(&self) {
        self.run(Strategy::NetworkOnly).await;
    }

    /// Drops the cached entry and marks the shown data stale without reloading.
    pub async fn invalidate(&self) {
        self.inner
            .cache
            .delete(&self.inner.key, self.inner.options.storage)
            .await;
        self.apply(|state| state.is_stale = true);
    }

    async fn run(&self, strategy: Strategy) {
        if !self.is_live() {
            return;
        }

        debug!(key = %self.inner.key, %strategy, "fetch");
        self.apply(|state| {
            state.loading = true;
            state.error = None;
        });

        match strategy {
            Strategy::CacheFirst => match self.read_cache().await {
                Some(data) => self.apply(|state| state.show(data, false)),
                None => self.load_into_state().await,
            },
            Strategy::NetworkFirst => match self.load().await {
                Ok(data) => self.apply(|state| state.show(data, false)),
                Err(err) => match self.read_cache().await {
                    Some(data) => {
                        debug!(key = %self.inner.key, "network failed, serving cached data");
                        self.apply(|state| state.show(data, true));
                    }
                    None => self.apply(|state| state.error = Some(err)),
                },
            },
            Strategy::CacheOnly => {
                let cached = self.read_cache().await;
                self.apply(|state| {
                    state.data = cached;
                    state.is_stale = false;
                });
            }
            Strategy::NetworkOnly => self.load_into_state().await,
            Strategy::StaleWhileRevalidate => match self.read_cache().await {
                Some(data) => {
                    self.apply(|state| {
                        state.show(data, true);
                        state.loading = false;
                    });
                    self.spawn_revalidation();
                }
                None => self.load_into_state().await,
            },
        }

        self.apply(|state| state.loading = false);
    }

    // == Revalidation ==
    /// Reloads in the background when the cached value is older than the
    /// stale window. Returns whether a reload ran.
    pub async fn revalidate_if_stale(&self) -> bool {
        let options = &self.inner.options;
        if !self.is_live() || !self.is_enabled() || options.strategy == Strategy::CacheOnly {
            return false;
        }

        let fresh = self
            .inner
            .cache
            .metadata(&self.inner.key, options.storage)
            .await
            .map_or(false, |meta| meta.age_ms() <= options.stale_time_ms);
        if fresh {
            return false;
        }

        self.apply(|state| state.is_stale = true);
        self.load_into_state().await;
        true
    }

    /// Visibility-regained trigger.
    pub async fn on_window_focus(&self) -> bool {
        if !self.inner.options.refetch_on_window_focus {
            return false;
        }
        self.revalidate_if_stale().await
    }

    /// Spawns a task that checks freshness every stale window until unmount.
    pub fn spawn_stale_watch(&self) -> Option<JoinHandle<()>> {
        let stale_time = self.inner.options.stale_time_ms;
        if stale_time == 0 {
            return None;
        }

        let query = self.clone();
        Some(tokio::spawn(async move {
            let period = Duration::from_millis(stale_time);
            loop {
                tokio::time::sleep(period).await;
                if !query.is_live() {
                    break;
                }
                query.revalidate_if_stale().await;
            }
        }))
    }

    fn spawn_revalidation(&self) {
        let query = self.clone();
        let handle = tokio::spawn(async move { query.load_into_state().await });

        let mut background = lock(&self.inner.background);
        background.retain(|task| !task.is_finished());
        background.push(handle);
    }

    /// Waits for the in-flight load and any background revalidations.
    pub async fn settle(&self) {
        let pending = lock(&self.inner.inflight).clone();
        if let Some(load) = pending {
            let _ = load.await;
        }

        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.background).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    // == Internals ==
    async fn read_cache(&self) -> Option<T> {
        self.inner
            .cache
            .get(&self.inner.key, self.inner.options.storage)
            .await
    }

    /// Loads and publishes the result. Never touches `loading`, and an error
    /// keeps whatever data was already shown.
    async fn load_into_state(&self) {
        match self.load().await {
            Ok(data) => self.apply(|state| state.show(data, false)),
            Err(err) => self.apply(|state| state.error = Some(err)),
        }
    }

    /// Starts a loader call or joins the one already running. A successful
    /// result is written to the cache exactly once.
    fn load(&self) -> SharedLoad<T> {
        let mut slot = lock(&self.inner.inflight);
        if let Some(pending) = slot.as_ref() {
            debug!(key = %self.inner.key, "joining in-flight load");
            return pending.clone();
        }

        let inner = Arc::clone(&self.inner);
        let load = async move {
            let result = (inner.loader)().await.map_err(Arc::new);
            match &result {
                Ok(data) => {
                    let options = inner.options.set_options();
                    if !inner.cache.set(&inner.key, data, options).await {
                        debug!(key = %inner.key, "loaded data was not cached");
                    }
                }
                Err(err) => warn!(key = %inner.key, error = %err, "loader failed"),
            }
            lock(&inner.inflight).take();
            result
        }
        .boxed()
        .shared();

        *slot = Some(load.clone());
        load
    }

    fn apply(&self, update: impl FnOnce(&mut FetchState<T>)) {
        if self.is_live() {
            self.inner.state.send_modify(update);
        }
    }
}
