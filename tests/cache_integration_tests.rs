//! Integration Tests for the public cache API
//!
//! Drives the façade, fetch strategies and warming together the way an
//! application would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tiered_cache::cache::{CacheEntry, DurableStore, EntryStore, QuotaStore, StorageArea};
use tiered_cache::{
    ApiQuery, CacheManager, CacheWarmer, Config, FetchOptions, HoverPrefetcher, IdleSignal,
    SetOptions, StorageKind, Strategy, WarmPhase,
};

// == Helper Functions ==

fn create_cache() -> Arc<CacheManager> {
    Arc::new(CacheManager::new(&Config::default()))
}

fn delayed_loader(
    calls: &Arc<AtomicUsize>,
    value: &'static str,
    delay_ms: u64,
) -> impl Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, anyhow::Error>(value.to_string())
        }
        .boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tour {
    id: u32,
    name: String,
}

// == Fetch Strategy Scenarios ==

#[tokio::test]
async fn test_cache_first_serves_second_call_from_cache() {
    let cache = create_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = FetchOptions::default().strategy(Strategy::CacheFirst);

    let first = ApiQuery::new(Arc::clone(&cache), "tours", delayed_loader(&calls, "A", 0), options);
    first.mount().await;
    assert_eq!(first.state().data.as_deref(), Some("A"));

    let second = ApiQuery::new(
        Arc::clone(&cache),
        "tours",
        delayed_loader(&calls, "B", 0),
        options,
    );
    second.mount().await;
    assert_eq!(second.state().data.as_deref(), Some("A"));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_while_revalidate_yields_old_then_new() {
    let cache = create_cache();
    cache.set("tours", &"old", SetOptions::default()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let query = ApiQuery::new(
        Arc::clone(&cache),
        "tours",
        delayed_loader(&calls, "new", 50),
        FetchOptions::default().strategy(Strategy::StaleWhileRevalidate),
    );
    let mut observer = query.subscribe();

    // Two consumers of the same query trigger concurrently
    let other = query.clone();
    tokio::join!(query.fetch(), other.fetch());

    let state = query.state();
    assert_eq!(state.data.as_deref(), Some("old"));
    assert!(state.is_stale);

    observer
        .wait_for(|state| state.data.as_deref() == Some("new"))
        .await
        .unwrap();
    query.settle().await;

    let state = query.state();
    assert!(!state.is_stale);
    assert!(state.error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get::<String>("tours", None).await.as_deref(), Some("new"));
}

#[tokio::test]
async fn test_network_first_cold_failure() {
    let query = ApiQuery::new(
        create_cache(),
        "tours",
        || async { Err::<String, _>(anyhow::anyhow!("connection refused")) },
        FetchOptions::default().strategy(Strategy::NetworkFirst),
    );

    query.mount().await;

    let state = query.state();
    assert!(state.data.is_none());
    assert!(state.error.is_some());
    assert!(!state.loading);
}

#[tokio::test]
async fn test_unmounted_query_never_fetches() {
    let cache = create_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = ApiQuery::new(
        Arc::clone(&cache),
        "tours",
        delayed_loader(&calls, "late", 0),
        FetchOptions::default().strategy(Strategy::NetworkOnly),
    );

    query.unmount();
    query.mount().await;

    assert!(query.state().data.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_typed_payload_through_durable_backend() {
    let cache = create_cache();
    let tours = vec![
        Tour {
            id: 1,
            name: "Lisbon coast".into(),
        },
        Tour {
            id: 2,
            name: "Atlas trek".into(),
        },
    ];
    let payload = tours.clone();
    let query = ApiQuery::new(
        Arc::clone(&cache),
        "tours",
        move || {
            let payload = payload.clone();
            async move { Ok::<_, anyhow::Error>(payload) }
        },
        FetchOptions::default().storage(StorageKind::Durable),
    );

    query.mount().await;

    assert_eq!(query.state().data, Some(tours.clone()));
    let cached: Option<Vec<Tour>> = cache.get("tours", Some(StorageKind::Durable)).await;
    assert_eq!(cached, Some(tours));
}

// == Backend Scenarios ==

#[tokio::test]
async fn test_quota_overflow_evicts_oldest_quarter() {
    let prefix = "app_cache_";
    let record = |i: u64| {
        let mut entry = CacheEntry::new(serde_json::json!({ "n": "x" }), None, 1);
        entry.timestamp = 1_700_000_000_000 + i;
        (format!("{prefix}item{i:02}"), entry)
    };
    let (k0, e0) = record(0);
    let per_record = k0.len() + serde_json::to_string(&e0).unwrap().len();
    let mut store = QuotaStore::new(StorageArea::new(per_record * 12), prefix);

    for i in 0..12 {
        let (key, entry) = record(i);
        assert!(store.set(&key, entry).is_ok());
    }
    let (key, entry) = record(12);
    assert!(store.set(&key, entry).is_ok());

    // ceil(12 / 4) = 3 oldest removed, the new write landed
    assert_eq!(store.keys().len(), 10);
    for i in 0..3 {
        assert!(store.get(&format!("{prefix}item{i:02}")).is_none());
    }
    assert!(store.get(&key).is_some());
}

#[tokio::test]
async fn test_durable_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let config = Config {
        durable_path: Some(path.clone()),
        ..Config::default()
    };

    {
        let cache = CacheManager::new(&config);
        let options = SetOptions::default().storage(StorageKind::Durable);
        assert!(cache.set("destinations", &vec!["Portugal", "Norway"], options).await);
    }

    let reopened = CacheManager::new(&config);
    let destinations: Option<Vec<String>> =
        reopened.get("destinations", Some(StorageKind::Durable)).await;
    assert_eq!(destinations, Some(vec!["Portugal".to_string(), "Norway".to_string()]));

    let stats = DurableStore::new(Some(path), config.durable_max_bytes)
        .stats()
        .await
        .unwrap();
    assert_eq!(stats.total_entries, 1);
}

#[tokio::test]
async fn test_backends_are_independent_namespaces() {
    let cache = create_cache();
    cache.set("k", &"memory", SetOptions::default().storage(StorageKind::Memory)).await;
    cache.set("k", &"local", SetOptions::default().storage(StorageKind::Local)).await;

    cache.delete("k", Some(StorageKind::Memory)).await;

    assert!(cache.get::<String>("k", Some(StorageKind::Memory)).await.is_none());
    assert_eq!(
        cache.get::<String>("k", Some(StorageKind::Local)).await.as_deref(),
        Some("local")
    );
}

#[tokio::test]
async fn test_expired_entry_is_a_miss_everywhere() {
    let cache = create_cache();
    for kind in StorageKind::ALL {
        cache.set("flash", &1, SetOptions::default().ttl_ms(20).storage(kind)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    for kind in StorageKind::ALL {
        assert!(cache.get::<i32>("flash", Some(kind)).await.is_none(), "{kind} still served");
    }
    assert_eq!(cache.stats().misses, 4);
}

// == Warming Scenarios ==

#[tokio::test]
async fn test_warming_lifecycle() {
    let cache = create_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut warmer = CacheWarmer::new(Arc::clone(&cache));
    warmer
        .register(
            WarmPhase::Immediate,
            "tours",
            SetOptions::default(),
            delayed_loader(&calls, "t", 0),
        )
        .register(
            WarmPhase::Immediate,
            "destinations",
            SetOptions::default(),
            delayed_loader(&calls, "d", 0),
        )
        .register(
            WarmPhase::Deferred,
            "testimonials",
            SetOptions::default(),
            delayed_loader(&calls, "x", 0),
        );

    let report = warmer.warm_immediate().await;
    assert_eq!(report.warmed, 2);

    let idle = IdleSignal::new();
    let deferred = warmer.schedule_deferred(&idle, Duration::from_millis(20));
    deferred.join().await;
    assert!(cache.metadata("testimonials", None).await.is_some());

    // Warming again is a no-op, refresh reloads everything
    assert_eq!(warmer.warm_immediate().await.skipped, 2);
    assert_eq!(warmer.refresh_stale_cache().await.warmed, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_hover_prefetch_feeds_cache_first_query() {
    let cache = create_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let prefetcher = HoverPrefetcher::new(
        Arc::clone(&cache),
        "https://travel.example.com",
        "/tours/:id",
        "tour:",
        SetOptions::default(),
        move |id: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, anyhow::Error>(Tour {
                    id: id.parse()?,
                    name: format!("Tour {id}"),
                })
            }
        },
    )
    .unwrap();

    prefetcher
        .on_pointer_enter(Some("/tours/5"))
        .unwrap()
        .await
        .unwrap();
    assert!(prefetcher.on_pointer_enter(Some("mailto:hello@example.com")).is_none());

    let query = ApiQuery::new(
        Arc::clone(&cache),
        "tour:5",
        || async { Err::<Tour, _>(anyhow::anyhow!("should be served from cache")) },
        FetchOptions::default(),
    );
    query.mount().await;

    assert_eq!(query.state().data.map(|tour| tour.id), Some(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
