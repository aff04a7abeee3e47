//! Tiered Cache demo
//!
//! Warms a cache for a small travel catalogue, serves a query through it and
//! keeps refreshing until interrupted.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiered_cache::{
    spawn_cleanup_task, ApiQuery, CacheManager, CacheWarmer, Config, FetchOptions,
    HoverPrefetcher, IdleSignal, SetOptions, StorageKind, Strategy, WarmPhase,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tour {
    id: u32,
    name: String,
    days: u8,
}

/// Stands in for a slow upstream API.
async fn fetch_tours() -> anyhow::Result<Vec<Tour>> {
    tokio::time::sleep(Duration::from_millis(150)).await;
    Ok(vec![
        Tour {
            id: 1,
            name: "Lisbon coast".into(),
            days: 5,
        },
        Tour {
            id: 2,
            name: "Atlas trek".into(),
            days: 8,
        },
        Tour {
            id: 3,
            name: "Fjord sailing".into(),
            days: 6,
        },
    ])
}

async fn fetch_tour(id: String) -> anyhow::Result<Tour> {
    let id: u32 = id.parse()?;
    fetch_tours()
        .await?
        .into_iter()
        .find(|tour| tour.id == id)
        .ok_or_else(|| anyhow::anyhow!("no tour with id {id}"))
}

async fn fetch_destinations() -> anyhow::Result<Vec<String>> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(vec!["Portugal".into(), "Morocco".into(), "Norway".into()])
}

async fn fetch_testimonials() -> anyhow::Result<Vec<String>> {
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(vec!["Unforgettable.".into(), "Perfectly organised.".into()])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tiered cache demo");

    let config = Config::from_env();
    info!(
        default_storage = %config.default_storage,
        default_ttl_ms = ?config.default_ttl_ms,
        memory_max_entries = config.memory_max_entries,
        durable_path = ?config.durable_path,
        "Configuration loaded"
    );

    let cache = Arc::new(CacheManager::new(&config));
    if let Err(e) = cache.durable().init().await {
        warn!(error = %e, "durable storage unavailable, durable writes will be skipped");
    }

    // Warming
    let mut warmer = CacheWarmer::new(Arc::clone(&cache));
    warmer
        .register(
            WarmPhase::Immediate,
            "tours",
            SetOptions::default().storage(StorageKind::Local),
            fetch_tours,
        )
        .register(
            WarmPhase::Immediate,
            "destinations",
            SetOptions::default().storage(StorageKind::Durable).never_expire(),
            fetch_destinations,
        )
        .register(
            WarmPhase::Deferred,
            "testimonials",
            SetOptions::default().storage(StorageKind::Session),
            fetch_testimonials,
        );
    warmer.warm_immediate().await;

    let idle = IdleSignal::new();
    let deferred = warmer.schedule_deferred(&idle, Duration::from_millis(config.deferred_delay_ms));
    let refresh = warmer.start_periodic_refresh(Duration::from_secs(config.refresh_interval));
    let cleanup = spawn_cleanup_task(Arc::clone(&cache), config.cleanup_interval);

    // A query served from the warmed entry
    let tours = ApiQuery::new(
        Arc::clone(&cache),
        "tours",
        fetch_tours,
        FetchOptions::default()
            .strategy(Strategy::StaleWhileRevalidate)
            .storage(StorageKind::Local),
    );
    tours.mount().await;
    let state = tours.state();
    info!(
        count = state.data.as_ref().map_or(0, Vec::len),
        stale = state.is_stale,
        "tours query resolved"
    );

    // Hovering a tour link warms its detail entry
    let prefetcher = HoverPrefetcher::new(
        Arc::clone(&cache),
        "https://travel.example.com/",
        "/tours/:id",
        "tour:",
        SetOptions::default(),
        fetch_tour,
    )?;
    if let Some(handle) = prefetcher.on_pointer_enter(Some("/tours/2")) {
        handle.await?;
    }

    idle.notify_idle();
    info!("Demo running, press Ctrl+C to stop");
    shutdown_signal().await;

    tours.unmount();
    deferred.cancel();
    refresh.cancel();
    cleanup.abort();
    warn!("Background tasks stopped");

    let stats = cache.stats_with_durable().await;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        sets = stats.sets,
        hit_rate = %format!("{:.1}%", stats.hit_rate),
        evictions = stats.evictions,
        "final cache statistics"
    );
    match cache.durable().stats().await {
        Ok(durable) => info!(
            entries = durable.total_entries,
            size = %durable.total_size,
            usage = %durable.usage_percent,
            "durable storage statistics"
        ),
        Err(e) => warn!(error = %e, "durable statistics unavailable"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
