//! HTTP response header scanner: one HEAD request against the site's own
//! root URL.

use reqwest::header::HeaderMap;
use reqwest::Client;
use std::sync::Arc;
use tracing::warn;

use crate::catalog::Catalog;
use crate::scanner::{DetectedTracker, DetectionMethod, Evidence, EvidenceScanner};

/// Headers that identify a service directly. Header-name matching is
/// case-insensitive (reqwest normalizes names to lowercase).
const HEADER_SERVICES: &[(&str, &str)] = &[
    ("x-ga-tracking-id", "google_analytics"),
    ("x-fb-pixel-id", "facebook_pixel"),
    ("x-hotjar-site-id", "hotjar"),
    ("x-matomo-site-id", "matomo"),
];

pub struct HeaderScanner {
    catalog: Arc<Catalog>,
    client: Client,
    site_url: String,
}

impl HeaderScanner {
    pub fn new(catalog: Arc<Catalog>, client: Client, site_url: String) -> Self {
        Self {
            catalog,
            client,
            site_url,
        }
    }

    pub(crate) fn detect_from_headers(
        catalog: &Catalog,
        headers: &HeaderMap,
    ) -> Vec<DetectedTracker> {
        let mut found = Vec::new();

        // (a) Direct header-name lookup.
        for (header_name, service_id) in HEADER_SERVICES {
            let Some(def) = catalog.get(service_id) else {
                continue;
            };
            let Some(value) = headers.get(*header_name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            // The header value is the id candidate; without a pattern the
            // raw value stands in.
            let extracted_id = def
                .extract_id(value)
                .or_else(|| Some(value.trim().to_string()).filter(|v| !v.is_empty()));
            found.push(DetectedTracker {
                service_id: def.service_id.clone(),
                detection_method: DetectionMethod::Header,
                evidence: Evidence::Header {
                    name: header_name.to_string(),
                    value: value.to_string(),
                },
                extracted_id,
            });
        }

        // (b) Generic X-Analytics header: comma-separated key=value pairs.
        if let Some(value) = headers.get("x-analytics").and_then(|v| v.to_str().ok()) {
            for pair in value.split(',') {
                let Some((key, val)) = pair.split_once('=') else {
                    continue;
                };
                let key = key.trim().to_lowercase();
                let val = val.trim();
                let service_id = if key.contains("ga") || key.contains("google") {
                    "google_analytics"
                } else if key.contains("fb") || key.contains("facebook") {
                    "facebook_pixel"
                } else {
                    continue;
                };
                let Some(def) = catalog.get(service_id) else {
                    continue;
                };
                let extracted_id = def
                    .extract_id(val)
                    .or_else(|| Some(val.to_string()).filter(|v| !v.is_empty()));
                found.push(DetectedTracker {
                    service_id: def.service_id.clone(),
                    detection_method: DetectionMethod::Header,
                    evidence: Evidence::Header {
                        name: "x-analytics".to_string(),
                        value: pair.trim().to_string(),
                    },
                    extracted_id,
                });
            }
        }

        // (c) Link headers pointing at known tracker hosts (preconnect,
        // dns-prefetch and similar hints).
        for value in headers.get_all("link") {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for def in catalog.iter() {
                if def.matches_url(value) {
                    found.push(DetectedTracker {
                        service_id: def.service_id.clone(),
                        detection_method: DetectionMethod::Header,
                        evidence: Evidence::Header {
                            name: "link".to_string(),
                            value: value.to_string(),
                        },
                        extracted_id: None,
                    });
                }
            }
        }

        found
    }
}

#[async_trait::async_trait]
impl EvidenceScanner for HeaderScanner {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Header
    }

    async fn scan(&self) -> Vec<DetectedTracker> {
        match self.client.head(&self.site_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                Self::detect_from_headers(&self.catalog, resp.headers())
            }
            Ok(resp) => {
                warn!(
                    "Header scan of {} got status {}, skipping",
                    self.site_url,
                    resp.status()
                );
                vec![]
            }
            Err(e) => {
                warn!("Header scan of {} failed: {}", self.site_url, e);
                vec![]
            }
        }
    }
}
