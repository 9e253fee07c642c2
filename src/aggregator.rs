//! Runs all evidence scanners, deduplicates their findings and persists
//! the result as the current detection snapshot.

use futures::future::join_all;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::scanner::{DetectedTracker, EvidenceScanner};
use crate::store::{self, keys, KeyValueStore};

/// The persisted result of the most recent full scan. Replaced wholesale
/// on every run; no history is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub detections: Vec<DetectedTracker>,
    pub last_scan_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatus {
    pub last_scan: Option<u64>,
    pub next_scan: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    InProgress,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct Aggregator {
    /// Fixed order: file, header, body. Dedup keeps the first occurrence,
    /// so this order is also the evidence precedence.
    scanners: Vec<Arc<dyn EvidenceScanner>>,
    store: Arc<dyn KeyValueStore>,
    cache_ttl: Duration,
    scan_lock: Mutex<()>,
}

impl Aggregator {
    pub fn new(
        scanners: Vec<Arc<dyn EvidenceScanner>>,
        store: Arc<dyn KeyValueStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            scanners,
            store,
            cache_ttl,
            scan_lock: Mutex::new(()),
        }
    }

    /// Run a full detection pass. A fresh-enough stored snapshot is
    /// returned as-is unless `force` is set; a scan already underway is
    /// rejected rather than double-writing the snapshot.
    pub async fn detect_tracking_tools(&self, force: bool) -> Result<DetectionSnapshot, ScanError> {
        if !force {
            if let Some(snapshot) = self.fresh_snapshot()? {
                info!(
                    "Serving detection snapshot from {} (within cache TTL)",
                    snapshot.last_scan_time
                );
                return Ok(snapshot);
            }
        }

        let _guard = self.scan_lock.try_lock().map_err(|_| ScanError::InProgress)?;

        info!("Starting tracker detection scan...");
        // Scanners have no data dependency on each other; run them
        // concurrently and join before aggregating.
        let results = join_all(self.scanners.iter().map(|s| s.scan())).await;
        let raw_count: usize = results.iter().map(Vec::len).sum();
        let detections = dedupe_by_service(results.into_iter().flatten().collect());

        let snapshot = DetectionSnapshot {
            detections,
            last_scan_time: now(),
        };
        store::set_json(self.store.as_ref(), keys::DETECTED_TOOLS, &snapshot.detections)?;
        store::set_json(
            self.store.as_ref(),
            keys::LAST_SCAN_TIME,
            &snapshot.last_scan_time,
        )?;

        info!(
            "Scan complete: {} service(s) detected ({} raw findings)",
            snapshot.detections.len(),
            raw_count
        );
        Ok(snapshot)
    }

    /// The stored snapshot, if any, regardless of age.
    pub fn latest(&self) -> anyhow::Result<Option<DetectionSnapshot>> {
        let Some(last_scan_time) = store::get_json::<u64>(self.store.as_ref(), keys::LAST_SCAN_TIME)?
        else {
            return Ok(None);
        };
        let detections =
            store::get_json(self.store.as_ref(), keys::DETECTED_TOOLS)?.unwrap_or_default();
        Ok(Some(DetectionSnapshot {
            detections,
            last_scan_time,
        }))
    }

    pub fn status(&self, interval: Duration) -> anyhow::Result<ScanStatus> {
        let last_scan = store::get_json::<u64>(self.store.as_ref(), keys::LAST_SCAN_TIME)?;
        Ok(ScanStatus {
            last_scan,
            next_scan: last_scan.map(|t| t + interval.as_secs()),
        })
    }

    fn fresh_snapshot(&self) -> anyhow::Result<Option<DetectionSnapshot>> {
        match self.latest()? {
            Some(snapshot)
                if now().saturating_sub(snapshot.last_scan_time) < self.cache_ttl.as_secs() =>
            {
                Ok(Some(snapshot))
            }
            _ => Ok(None),
        }
    }
}

/// First occurrence per service wins; scanner order determines precedence.
pub(crate) fn dedupe_by_service(detections: Vec<DetectedTracker>) -> Vec<DetectedTracker> {
    let mut seen = FxHashSet::default();
    detections
        .into_iter()
        .filter(|d| seen.insert(d.service_id.clone()))
        .collect()
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
