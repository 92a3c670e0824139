//! aqi-sync: keeps air-quality readings fresh for a set of locations.
//!
//! Single-binary Tokio application that:
//! 1. Polls the WAQI API per configured location, behind a TTL cache
//! 2. Logs material changes and connection transitions
//! 3. Builds weekly reports with trend and severity insights on demand

mod config;

use std::{sync::Arc, time::Duration};

use chrono::SecondsFormat;
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use common::config::{InsightsConfig, LocationConfig, SyncConfig};
use common::{Coordinates, FetchAdapter, Reading, SystemClock};
use insights::{band_for, generate_with_fallback, ReportAssembler};
use poller::{ChannelSubscriber, CycleOutcome, Poller, PollerEvent, PollerRegistry};
use sync_cache::CachingAdapter;
use waqi_client::WaqiClient;

/// Air quality sync engine
#[derive(Parser)]
#[command(name = "aqi-sync", about = "Air quality polling, caching and weekly insights")]
struct Cli {
    /// Fetch one reading per location, print it, then exit.
    #[arg(long)]
    once: bool,

    /// Print a weekly report per location as JSON, then exit.
    #[arg(long)]
    report: bool,

    /// Search the provider's station directory, print the hits, then exit.
    #[arg(long, value_name = "KEYWORD")]
    search: Option<String>,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

fn coordinates(location: &LocationConfig) -> Coordinates {
    Coordinates::new(location.lat, location.lng)
}

fn category(value: f64, insights: &InsightsConfig) -> &str {
    band_for(value, &insights.bands)
        .map(|band| band.name.as_str())
        .unwrap_or("unknown")
}

fn describe(reading: &Reading, insights: &InsightsConfig) -> String {
    format!(
        "{} = {} ({}) from {} at {}",
        reading.location_label,
        reading.value,
        category(reading.value, insights),
        reading.source_name,
        reading
            .observed_at
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}

/// Log everything one poller reports until its subscriber is dropped.
async fn log_events(
    name: String,
    mut events: UnboundedReceiver<PollerEvent>,
    insights: InsightsConfig,
) {
    while let Some(event) = events.recv().await {
        match event {
            PollerEvent::Updated(reading) => {
                info!("[{}] {}", name, describe(&reading, &insights));
            }
            PollerEvent::Failed(err) => {
                warn!("[{}] fetch failed: {}", name, err);
            }
            PollerEvent::Connection(state) => {
                info!("[{}] connection → {:?}", name, state);
            }
        }
    }
}

async fn run_search(adapter: &CachingAdapter, keyword: &str) -> bool {
    match adapter.search(keyword).await {
        Ok(hits) => {
            info!("{} station(s) match {:?}", hits.len(), keyword);
            print_json(&hits);
            true
        }
        Err(e) => {
            error!("Search for {:?} failed: {}", keyword, e);
            false
        }
    }
}

async fn run_reports(cfg: &SyncConfig, adapter: Arc<CachingAdapter>) -> bool {
    let assembler = match ReportAssembler::new(
        adapter,
        cfg.insights.clone(),
        &cfg.cache,
        Arc::new(SystemClock),
    ) {
        Ok(a) => a,
        Err(e) => {
            error!("Failed to build report assembler: {}", e);
            return false;
        }
    };

    let mut ok = true;
    for location in &cfg.locations {
        let result =
            generate_with_fallback(&assembler, coordinates(location), Some(&location.name), cfg.fallback)
                .await;
        match result {
            Ok(Some(report)) => {
                if report.synthetic {
                    warn!("[{}] report uses placeholder data", location.name);
                }
                print_json(&report);
            }
            Ok(None) => {
                warn!("[{}] no history available for the last week", location.name);
            }
            Err(e) => {
                error!("[{}] report failed: {}", location.name, e);
                ok = false;
            }
        }
    }
    ok
}

async fn run_once(cfg: &SyncConfig, registry: &PollerRegistry, adapter: Arc<CachingAdapter>) -> bool {
    let mut ok = true;
    for location in &cfg.locations {
        let poller = registry.poller_for(coordinates(location), adapter.clone());
        match poller.start(coordinates(location)).await {
            CycleOutcome::Updated(reading) => {
                info!("[{}] {}", location.name, describe(&reading, &cfg.insights));
                print_json(&reading);
            }
            CycleOutcome::Failed(e) => {
                error!("[{}] fetch failed: {}", location.name, e);
                ok = false;
            }
            other => {
                warn!("[{}] no reading: {:?}", location.name, other);
            }
        }
    }
    registry.stop_all().await;
    ok
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "aqi_sync=info,poller=info,sync_cache=info,insights=info,waqi_client=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("aqi-sync starting up...");

    // Load configuration.
    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Locations: {:?}",
        cfg.locations.iter().map(|l| &l.name).collect::<Vec<_>>()
    );
    info!(
        "Poller: interval={}ms, min_gap={}ms, retries={}, base_delay={}ms",
        cfg.poller.poll_interval_ms,
        cfg.poller.min_fetch_interval_ms,
        cfg.poller.max_retries,
        cfg.poller.retry_delay_ms,
    );
    info!(
        "Cache TTLs: current={}ms, historical={}ms, search={}ms, report={}ms",
        cfg.cache.current_ttl_ms,
        cfg.cache.historical_ttl_ms,
        cfg.cache.search_ttl_ms,
        cfg.cache.report_ttl_ms,
    );

    // ── Provider + cache ─────────────────────────────────────────────
    let client = match WaqiClient::new(&cfg.provider) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build WAQI client: {}", e);
            std::process::exit(1);
        }
    };
    let adapter = Arc::new(CachingAdapter::new(
        Arc::new(client),
        cfg.cache.clone(),
        Arc::new(SystemClock),
    ));

    // ── One-shot modes ───────────────────────────────────────────────
    if let Some(keyword) = cli.search.as_deref() {
        let ok = run_search(&adapter, keyword).await;
        std::process::exit(if ok { 0 } else { 1 });
    }

    if cli.report {
        let ok = run_reports(&cfg, adapter.clone()).await;
        std::process::exit(if ok { 0 } else { 1 });
    }

    let registry = match PollerRegistry::new(cfg.poller.clone()) {
        Ok(r) => r,
        Err(e) => {
            error!("Invalid poller config: {}", e);
            std::process::exit(1);
        }
    };

    if cli.once {
        let ok = run_once(&cfg, &registry, adapter.clone()).await;
        std::process::exit(if ok { 0 } else { 1 });
    }

    // ── Pollers ──────────────────────────────────────────────────────
    let mut pollers: Vec<(String, Poller)> = Vec::with_capacity(cfg.locations.len());
    for location in &cfg.locations {
        let poller = registry.poller_for(coordinates(location), adapter.clone());
        let (subscriber, events) = ChannelSubscriber::new();
        poller.subscribe(subscriber);
        tokio::spawn(log_events(location.name.clone(), events, cfg.insights.clone()));

        if let CycleOutcome::Failed(e) = poller.start(coordinates(location)).await {
            warn!("[{}] initial fetch failed: {}", location.name, e);
        }
        pollers.push((location.name.clone(), poller));
    }

    // ── Heartbeat ────────────────────────────────────────────────────
    let hb_adapter = adapter.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let purged = hb_adapter.purge_expired();
            let stats = hb_adapter.stats();
            let mut connected = 0;
            for (_, poller) in &pollers {
                if poller.connection().await == common::ConnectionState::Connected {
                    connected += 1;
                }
            }
            info!(
                "HEARTBEAT: pollers={} connected={} cache current={}/{} historical={}/{} search={}/{} purged={}",
                pollers.len(),
                connected,
                stats.current.valid,
                stats.current.total,
                stats.historical.valid,
                stats.historical.total,
                stats.search.valid,
                stats.search.total,
                purged
            );
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("aqi-sync is running. Press Ctrl+C to stop.");

    let shutdown_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            "ctrl_c"
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
            "heartbeat_task_exit"
        }
    };

    registry.stop_all().await;
    info!("aqi-sync stopped ({})", shutdown_reason);
}
