//! Per-service opt-out configuration: sanitized admin input merged with
//! scan results.
//!
//! Sanitization is a whitelist pass over the catalog, not a validation of
//! the raw input: unknown services and parameters are dropped without
//! error, values are reduced to plain text.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::store::{self, keys, KeyValueStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Single manual id override ("leave blank to use the detected id").
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TrackerConfig {
    /// The named parameter if set, otherwise the manual/detected id.
    pub fn param_or_id(&self, name: &str) -> &str {
        match self.parameters.get(name) {
            Some(v) if !v.is_empty() => v,
            _ => &self.id,
        }
    }

    fn has_any_id(&self) -> bool {
        !self.id.is_empty() || self.parameters.values().any(|v| !v.is_empty())
    }
}

/// service_id -> config, ordered for stable serialization.
pub type TrackerSettings = BTreeMap<String, TrackerConfig>;

/// Reduce raw admin input to settings for catalog services only.
///
/// Every catalog entry gets an output row: `enabled` is a boolean cast of
/// the raw field, each declared parameter is sanitized to plain text
/// (missing parameters become empty strings). Input keys that are not
/// catalog services are ignored.
pub fn sanitize_tracker_config(catalog: &Catalog, raw: &Value) -> TrackerSettings {
    let mut settings = TrackerSettings::new();
    let raw_map = raw.as_object();

    for def in catalog.iter() {
        let raw_entry = raw_map.and_then(|m| m.get(&def.service_id));

        let enabled = truthy(raw_entry.and_then(|e| e.get("enabled")));
        let id = raw_entry
            .and_then(|e| e.get("id"))
            .and_then(Value::as_str)
            .map(sanitize_text_field)
            .unwrap_or_default();

        let mut parameters = BTreeMap::new();
        for name in &def.parameters {
            let value = raw_entry
                .and_then(|e| e.get("parameters"))
                .and_then(|p| p.get(name))
                .and_then(Value::as_str)
                .map(sanitize_text_field)
                .unwrap_or_default();
            parameters.insert(name.clone(), value);
        }

        settings.insert(
            def.service_id.clone(),
            TrackerConfig {
                enabled,
                id,
                parameters,
            },
        );
    }

    settings
}

/// Boolean cast for checkbox-style input: true, 1, "1", "true", "on".
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => matches!(s.as_str(), "1" | "true" | "on"),
        _ => false,
    }
}

/// Plain-text reduction: tags removed, control characters stripped,
/// whitespace runs collapsed, ends trimmed.
pub fn sanitize_text_field(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    let mut last_was_space = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_control() || c.is_whitespace() => {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            }
            c => {
                out.push(c);
                last_was_space = false;
            }
        }
    }
    out.trim().to_string()
}

pub fn load_settings(store: &dyn KeyValueStore) -> Result<TrackerSettings> {
    Ok(store::get_json(store, keys::TRACKERS)?.unwrap_or_default())
}

pub fn save_settings(store: &dyn KeyValueStore, settings: &TrackerSettings) -> Result<()> {
    store::set_json(store, keys::TRACKERS, settings)
}

/// Merge the latest detection snapshot into the settings: every detected
/// catalog service becomes enabled, and services without a manual id get
/// the detected id seeded in. Returns the number of services changed.
pub fn enable_detected_trackers(store: &dyn KeyValueStore, catalog: &Catalog) -> Result<usize> {
    let snapshot: Vec<crate::scanner::DetectedTracker> =
        store::get_json(store, keys::DETECTED_TOOLS)?.unwrap_or_default();
    let mut settings = load_settings(store)?;
    let mut changed = 0;

    for detection in &snapshot {
        if !catalog.contains(&detection.service_id) {
            debug!(
                "Skipping detected service not in catalog: {}",
                detection.service_id
            );
            continue;
        }
        let entry = settings.entry(detection.service_id.clone()).or_default();
        let mut touched = false;
        if !entry.enabled {
            entry.enabled = true;
            touched = true;
        }
        if !entry.has_any_id() {
            if let Some(id) = &detection.extracted_id {
                entry.id = id.clone();
                touched = true;
            }
        }
        if touched {
            changed += 1;
        }
    }

    if changed > 0 {
        save_settings(store, &settings)?;
        info!("Enabled {} detected tracker(s)", changed);
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{DetectedTracker, DetectionMethod, Evidence};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    #[test]
    fn sanitize_casts_enabled_and_strips_markup() {
        let raw = json!({
            "google_analytics": {
                "enabled": "1",
                "parameters": { "tracking_id": "<script>x</script>UA-1234-5" }
            }
        });
        let settings = sanitize_tracker_config(&catalog(), &raw);
        let ga = &settings["google_analytics"];
        assert!(ga.enabled);
        let tracking_id = &ga.parameters["tracking_id"];
        assert!(!tracking_id.contains('<'));
        assert!(tracking_id.contains("UA-1234-5"));
    }

    #[test]
    fn sanitize_drops_unknown_services() {
        let raw = json!({
            "totally_unknown": { "enabled": true },
            "hotjar": { "enabled": true }
        });
        let settings = sanitize_tracker_config(&catalog(), &raw);
        assert!(!settings.contains_key("totally_unknown"));
        assert!(settings["hotjar"].enabled);
    }

    #[test]
    fn sanitize_defaults_missing_fields() {
        let settings = sanitize_tracker_config(&catalog(), &json!({}));
        // Every catalog service appears, disabled, with declared params empty.
        assert_eq!(settings.len(), catalog().len());
        let ga = &settings["google_analytics"];
        assert!(!ga.enabled);
        assert_eq!(ga.parameters["tracking_id"], "");
    }

    #[test]
    fn truthy_casts() {
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!(1))));
        assert!(truthy(Some(&json!("1"))));
        assert!(truthy(Some(&json!("on"))));
        assert!(!truthy(Some(&json!(false))));
        assert!(!truthy(Some(&json!("0"))));
        assert!(!truthy(Some(&json!(""))));
        assert!(!truthy(None));
    }

    #[test]
    fn sanitize_text_field_strips_controls_and_collapses() {
        assert_eq!(sanitize_text_field("  a\t\tb\nc  "), "a b c");
        assert_eq!(sanitize_text_field("<b>bold</b> text"), "bold text");
        assert_eq!(sanitize_text_field("x\u{0000}y"), "x y");
    }

    #[test]
    fn enable_detected_seeds_id() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let snapshot = vec![
            DetectedTracker {
                service_id: "google_analytics".to_string(),
                detection_method: DetectionMethod::File,
                evidence: Evidence::File {
                    path: "theme/header.php".to_string(),
                },
                extracted_id: Some("UA-123456-1".to_string()),
            },
            DetectedTracker {
                service_id: "not_in_catalog".to_string(),
                detection_method: DetectionMethod::Header,
                evidence: Evidence::Header {
                    name: "x".to_string(),
                    value: "y".to_string(),
                },
                extracted_id: None,
            },
        ];
        crate::store::set_json(&store, keys::DETECTED_TOOLS, &snapshot).unwrap();

        let changed = enable_detected_trackers(&store, &catalog).unwrap();
        assert_eq!(changed, 1);

        let settings = load_settings(&store).unwrap();
        let ga = &settings["google_analytics"];
        assert!(ga.enabled);
        assert_eq!(ga.id, "UA-123456-1");
        assert!(!settings.contains_key("not_in_catalog"));
    }

    #[test]
    fn enable_detected_keeps_manual_id() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let mut settings = TrackerSettings::new();
        settings.insert(
            "google_analytics".to_string(),
            TrackerConfig {
                enabled: false,
                id: "UA-999999-9".to_string(),
                parameters: BTreeMap::new(),
            },
        );
        save_settings(&store, &settings).unwrap();

        let snapshot = vec![DetectedTracker {
            service_id: "google_analytics".to_string(),
            detection_method: DetectionMethod::File,
            evidence: Evidence::File {
                path: "p".to_string(),
            },
            extracted_id: Some("UA-123456-1".to_string()),
        }];
        crate::store::set_json(&store, keys::DETECTED_TOOLS, &snapshot).unwrap();

        enable_detected_trackers(&store, &catalog).unwrap();
        let settings = load_settings(&store).unwrap();
        let ga = &settings["google_analytics"];
        assert!(ga.enabled);
        assert_eq!(ga.id, "UA-999999-9");
    }

    #[test]
    fn param_or_id_falls_back() {
        let mut config = TrackerConfig {
            enabled: true,
            id: "detected".to_string(),
            parameters: BTreeMap::new(),
        };
        assert_eq!(config.param_or_id("tracking_id"), "detected");
        config
            .parameters
            .insert("tracking_id".to_string(), "manual".to_string());
        assert_eq!(config.param_or_id("tracking_id"), "manual");
    }
}
