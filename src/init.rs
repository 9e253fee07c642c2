//! Initialization helpers for the application startup.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::scanner::{build_scan_client, BodyScanner, EvidenceScanner, FileScanner, HeaderScanner};
use crate::store::{KeyValueStore, SqliteStore};

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

pub fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    let store = SqliteStore::open(&config.storage.path)?;
    Ok(Arc::new(store))
}

/// Build the evidence scanners in their fixed order: file, header, body.
/// The order doubles as dedup precedence in the aggregator. The two
/// remote scanners need a site URL; without one only the file scanner
/// runs.
pub fn build_scanners(
    config: &Config,
    catalog: Arc<Catalog>,
) -> Result<Vec<Arc<dyn EvidenceScanner>>> {
    let mut scanners: Vec<Arc<dyn EvidenceScanner>> = vec![Arc::new(FileScanner::new(
        catalog.clone(),
        config.scan.roots.clone(),
    ))];

    if config.site_url.is_empty() {
        warn!("site_url is not configured; header and body scans are disabled");
        return Ok(scanners);
    }

    let head_client = build_scan_client(
        &config.scan.user_agent,
        Duration::from_secs(config.scan.head_timeout_secs),
        config.scan.accept_invalid_certs,
    )?;
    scanners.push(Arc::new(HeaderScanner::new(
        catalog.clone(),
        head_client,
        config.site_url.clone(),
    )));

    let body_client = build_scan_client(
        &config.scan.user_agent,
        Duration::from_secs(config.scan.body_timeout_secs),
        config.scan.accept_invalid_certs,
    )?;
    scanners.push(Arc::new(BodyScanner::new(
        catalog,
        body_client,
        config.site_url.clone(),
    )));

    Ok(scanners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::DetectionMethod;

    #[test]
    fn no_site_url_means_file_scanner_only() {
        let config = Config::default();
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let scanners = build_scanners(&config, catalog).unwrap();
        assert_eq!(scanners.len(), 1);
        assert_eq!(scanners[0].method(), DetectionMethod::File);
    }

    #[test]
    fn full_scanner_set_in_fixed_order() {
        let config = Config {
            site_url: "https://example.com".to_string(),
            ..Default::default()
        };
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let scanners = build_scanners(&config, catalog).unwrap();
        let methods: Vec<_> = scanners.iter().map(|s| s.method()).collect();
        assert_eq!(
            methods,
            vec![
                DetectionMethod::File,
                DetectionMethod::Header,
                DetectionMethod::ExternalHtml,
            ]
        );
    }
}
