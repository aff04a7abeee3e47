//! Hover Prefetch
//!
//! Warms a detail item's cache entry when the pointer enters a link to it,
//! so that following the link is served from cache.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{lock, CacheManager, SetOptions};

type ItemLoader = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

// == Hover Prefetcher ==
/// Prefetches `/<route>/<id>` links on the base origin.
///
/// The cache key for an item is `key_prefix` followed by its id.
#[derive(Clone)]
pub struct HoverPrefetcher {
    cache: Arc<CacheManager>,
    base: Url,
    route: String,
    key_prefix: String,
    options: SetOptions,
    loader: ItemLoader,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for HoverPrefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoverPrefetcher")
            .field("base", &self.base.as_str())
            .field("route", &self.route)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl HoverPrefetcher {
    /// `pattern` has the form `/tours/:id`; only its first segment is used.
    pub fn new<T, F, Fut>(
        cache: Arc<CacheManager>,
        base: &str,
        pattern: &str,
        key_prefix: impl Into<String>,
        options: SetOptions,
        loader: F,
    ) -> Result<Self, url::ParseError>
    where
        T: Serialize + Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let base = Url::parse(base)?;
        let route = pattern
            .trim_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let loader: ItemLoader = Arc::new(move |id| {
            loader(id)
                .map(|result| result.and_then(|data| Ok(serde_json::to_value(data)?)))
                .boxed()
        });

        Ok(Self {
            cache,
            base,
            route,
            key_prefix: key_prefix.into(),
            options,
            loader,
            pending: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn key_for(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// Extracts the item id from `href`, or None if it is not a detail link.
    pub fn detail_id(&self, href: &str) -> Option<String> {
        let url = self.base.join(href).ok()?;
        if url.origin() != self.base.origin() {
            return None;
        }

        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        let route = segments.next()?;
        let id = segments.next()?;
        if route != self.route || segments.next().is_some() {
            return None;
        }
        Some(id.to_string())
    }

    /// Pointer entered a link. Starts a background prefetch when `href`
    /// is a detail link that is neither cached nor already being fetched.
    pub fn on_pointer_enter(&self, href: Option<&str>) -> Option<JoinHandle<bool>> {
        let id = self.detail_id(href?)?;
        if !lock(&self.pending).insert(id.clone()) {
            return None;
        }

        let prefetcher = self.clone();
        Some(tokio::spawn(async move {
            let warmed = prefetcher.prefetch(&id).await;
            lock(&prefetcher.pending).remove(&id);
            warmed
        }))
    }

    /// Loads and caches item `id` unless it is already cached.
    ///
    /// Returns true when a new entry was written.
    pub async fn prefetch(&self, id: &str) -> bool {
        let key = self.key_for(id);
        if self.cache.metadata(&key, self.options.storage).await.is_some() {
            debug!(key = %key, "prefetch skipped, already cached");
            return false;
        }

        match (self.loader)(id.to_string()).await {
            Ok(data) => self.cache.set(&key, &data, self.options).await,
            Err(e) => {
                warn!(key = %key, error = %e, "prefetch failed");
                false
            }
        }
    }
}
