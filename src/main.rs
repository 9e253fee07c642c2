use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use notrack::aggregator::{Aggregator, ScanError};
use notrack::api::{start_api_server, ApiContext};
use notrack::catalog::Catalog;
use notrack::config::Config;
use notrack::init::{build_scanners, open_store, setup_logging};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args().nth(1).unwrap_or("notrack.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting notrack...");

    if !std::path::Path::new(&config_path).exists() {
        info!("Config file not found, using defaults.");
    }

    // 3. Open Option Store
    let store = open_store(&config)?;

    // 4. Build Catalog (fails fast on malformed patterns)
    let catalog = Arc::new(Catalog::builtin()?);
    info!("Tracker catalog loaded: {} services", catalog.len());

    // 5. Build Scanners & Aggregator
    let scanners = build_scanners(&config, catalog.clone())?;
    let aggregator = Arc::new(Aggregator::new(
        scanners,
        store.clone(),
        Duration::from_secs(config.scan.cache_ttl_secs),
    ));

    // 6. Spawn Periodic Scanner
    // The first tick completes immediately, which doubles as the
    // install-time scan when no snapshot exists yet.
    let scan_interval = Duration::from_secs(config.scan.interval_hours * 3600);
    let aggregator_for_loop = aggregator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(scan_interval);
        loop {
            interval.tick().await;
            info!("Scheduled tracker scan...");
            match aggregator_for_loop.detect_tracking_tools(false).await {
                Ok(snapshot) => {
                    info!(
                        "Scheduled scan done: {} service(s) in snapshot",
                        snapshot.detections.len()
                    );
                }
                Err(ScanError::InProgress) => {
                    info!("Scan already in progress, skipping scheduled run");
                }
                Err(e) => error!("Scheduled scan failed: {}", e),
            }
        }
    });

    // 7. Start API Server & Graceful Shutdown
    let context = Arc::new(ApiContext {
        catalog,
        aggregator,
        store,
        scan_interval,
    });

    tokio::select! {
        result = start_api_server(context, config.api_port) => result?,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    Ok(())
}
