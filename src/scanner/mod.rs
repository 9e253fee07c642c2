//! Evidence scanners: each inspects one source (local files, HTTP headers,
//! rendered HTML) and reports which catalog services it found there.

pub mod body;
pub mod file;
pub mod header;

pub use self::body::BodyScanner;
pub use self::file::FileScanner;
pub use self::header::HeaderScanner;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    File,
    Header,
    ExternalHtml,
}

/// Method-specific payload backing a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    File {
        path: String,
    },
    Header {
        name: String,
        value: String,
    },
    Element {
        element_type: String,
        element_data: String,
    },
}

/// One service found by one scanner. Ephemeral until the aggregator
/// deduplicates and persists the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedTracker {
    pub service_id: String,
    pub detection_method: DetectionMethod,
    pub evidence: Evidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_id: Option<String>,
}

/// A single evidence source. Scanners never fail the scan: transient I/O
/// problems are logged and reported as "no evidence found".
#[async_trait::async_trait]
pub trait EvidenceScanner: Send + Sync {
    fn method(&self) -> DetectionMethod;
    async fn scan(&self) -> Vec<DetectedTracker>;
}

/// HTTP client shared shape for the header and body scanners.
pub fn build_scan_client(
    user_agent: &str,
    timeout: Duration,
    accept_invalid_certs: bool,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .context("Failed to build scan HTTP client")
}
