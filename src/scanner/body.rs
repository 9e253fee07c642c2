//! Rendered-HTML scanner: one GET against the site's root URL, then a
//! walk over script/meta/link/iframe/img elements in the parsed document.

use reqwest::Client;
use rustc_hash::FxHashSet;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::warn;

use crate::catalog::Catalog;
use crate::scanner::{DetectedTracker, DetectionMethod, Evidence, EvidenceScanner};

/// Meta tags are only interesting when their name hints at a tracking or
/// social integration.
const META_NAME_HINTS: &[&str] = &["google", "fb", "facebook", "twitter", "analytics", "pixel"];

/// Evidence snippet length around a keyword hit.
const SNIPPET_LEN: usize = 40;
const SNIPPET_LEAD: usize = 20;

pub struct BodyScanner {
    catalog: Arc<Catalog>,
    client: Client,
    site_url: String,
}

impl BodyScanner {
    pub fn new(catalog: Arc<Catalog>, client: Client, site_url: String) -> Self {
        Self {
            catalog,
            client,
            site_url,
        }
    }

    /// Parse and inspect one HTML document. The parser tolerates malformed
    /// markup; whatever it salvages is scanned.
    pub(crate) fn scan_document(catalog: &Catalog, html: &str) -> Vec<DetectedTracker> {
        let document = Html::parse_document(html);
        let mut found = Vec::new();
        // One detection per (service, element type); repeated embeds of the
        // same service in the same kind of element add nothing.
        let mut seen: FxHashSet<(String, &'static str)> = FxHashSet::default();

        let script_selector = Selector::parse("script").unwrap();
        for element in document.select(&script_selector) {
            if let Some(src) = element.value().attr("src") {
                Self::match_url(catalog, src, "script", &mut seen, &mut found);
            }
            let inline: String = element.text().collect();
            if !inline.trim().is_empty() {
                Self::match_inline_script(catalog, &inline, &mut seen, &mut found);
            }
        }

        let meta_selector = Selector::parse("meta").unwrap();
        for element in document.select(&meta_selector) {
            Self::match_meta(catalog, element, &mut seen, &mut found);
        }

        for (selector, element_type, attr) in
            [("link", "link", "href"), ("iframe", "iframe", "src")]
        {
            let selector = Selector::parse(selector).unwrap();
            for element in document.select(&selector) {
                if let Some(url) = element.value().attr(attr) {
                    Self::match_url(catalog, url, element_type, &mut seen, &mut found);
                }
            }
        }

        let img_selector = Selector::parse("img").unwrap();
        for element in document.select(&img_selector) {
            if !Self::is_pixel_sized(element) {
                continue;
            }
            if let Some(src) = element.value().attr("src") {
                Self::match_url(catalog, src, "img", &mut seen, &mut found);
            }
        }

        found
    }

    fn match_url(
        catalog: &Catalog,
        url: &str,
        element_type: &'static str,
        seen: &mut FxHashSet<(String, &'static str)>,
        found: &mut Vec<DetectedTracker>,
    ) {
        for def in catalog.iter() {
            if !def.matches_url(url) {
                continue;
            }
            if !seen.insert((def.service_id.clone(), element_type)) {
                continue;
            }
            found.push(DetectedTracker {
                service_id: def.service_id.clone(),
                detection_method: DetectionMethod::ExternalHtml,
                evidence: Evidence::Element {
                    element_type: element_type.to_string(),
                    element_data: url.to_string(),
                },
                extracted_id: def.extract_id(url),
            });
        }
    }

    fn match_inline_script(
        catalog: &Catalog,
        inline: &str,
        seen: &mut FxHashSet<(String, &'static str)>,
        found: &mut Vec<DetectedTracker>,
    ) {
        let lowercased = inline.to_lowercase();
        for def in catalog.iter() {
            if seen.contains(&(def.service_id.clone(), "script")) {
                continue;
            }

            // Init-call shapes give a high-confidence id; keywords are the
            // fallback and only contribute a context snippet.
            if let Some((id, call)) = def.extract_init(inline) {
                seen.insert((def.service_id.clone(), "script"));
                found.push(DetectedTracker {
                    service_id: def.service_id.clone(),
                    detection_method: DetectionMethod::ExternalHtml,
                    evidence: Evidence::Element {
                        element_type: "script".to_string(),
                        element_data: call,
                    },
                    extracted_id: Some(id),
                });
                continue;
            }

            if let Some(pos) = def
                .keywords
                .iter()
                .find_map(|keyword| lowercased.find(keyword.as_str()))
            {
                seen.insert((def.service_id.clone(), "script"));
                found.push(DetectedTracker {
                    service_id: def.service_id.clone(),
                    detection_method: DetectionMethod::ExternalHtml,
                    evidence: Evidence::Element {
                        element_type: "script".to_string(),
                        element_data: snippet_around(&lowercased, pos),
                    },
                    extracted_id: def.extract_id(inline),
                });
            }
        }
    }

    fn match_meta(
        catalog: &Catalog,
        element: ElementRef<'_>,
        seen: &mut FxHashSet<(String, &'static str)>,
        found: &mut Vec<DetectedTracker>,
    ) {
        let Some(name) = element.value().attr("name") else {
            return;
        };
        let name_lower = name.to_lowercase();
        if !META_NAME_HINTS.iter().any(|hint| name_lower.contains(hint)) {
            return;
        }
        let content = element.value().attr("content").unwrap_or_default();
        let candidate = format!("{}: {}", name, content);
        let candidate_lower = candidate.to_lowercase();

        for def in catalog.iter() {
            if seen.contains(&(def.service_id.clone(), "meta")) {
                continue;
            }
            let (matched, extracted_id) = match def.extract_init(&candidate) {
                Some((id, _)) => (true, Some(id)),
                None if def.matches_keywords(&candidate_lower) => {
                    (true, def.extract_id(&candidate))
                }
                None => (false, None),
            };
            if matched {
                seen.insert((def.service_id.clone(), "meta"));
                found.push(DetectedTracker {
                    service_id: def.service_id.clone(),
                    detection_method: DetectionMethod::ExternalHtml,
                    evidence: Evidence::Element {
                        element_type: "meta".to_string(),
                        element_data: candidate.clone(),
                    },
                    extracted_id,
                });
            }
        }
    }

    /// Tracking-pixel heuristic: an img counts when every declared
    /// dimension is at most 3px; undeclared or non-numeric dimensions do
    /// not disqualify it.
    fn is_pixel_sized(element: ElementRef<'_>) -> bool {
        ["width", "height"].iter().all(|attr| {
            match element
                .value()
                .attr(attr)
                .and_then(|v| v.trim().parse::<u32>().ok())
            {
                Some(size) => size <= 3,
                None => true,
            }
        })
    }
}

/// Up to `SNIPPET_LEN` chars of context starting `SNIPPET_LEAD` chars
/// before the match, aligned to char boundaries.
fn snippet_around(text: &str, pos: usize) -> String {
    let mut start = pos.saturating_sub(SNIPPET_LEAD);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + SNIPPET_LEN).min(text.len());
    while end > start && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[start..end].to_string()
}

#[async_trait::async_trait]
impl EvidenceScanner for BodyScanner {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::ExternalHtml
    }

    async fn scan(&self) -> Vec<DetectedTracker> {
        let response = match self.client.get(&self.site_url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(
                    "Body scan of {} got status {}, skipping",
                    self.site_url,
                    resp.status()
                );
                return vec![];
            }
            Err(e) => {
                warn!("Body scan of {} failed: {}", self.site_url, e);
                return vec![];
            }
        };
        match response.text().await {
            Ok(body) => Self::scan_document(&self.catalog, &body),
            Err(e) => {
                warn!("Body scan of {} failed reading body: {}", self.site_url, e);
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    fn services(found: &[DetectedTracker]) -> Vec<&str> {
        found.iter().map(|d| d.service_id.as_str()).collect()
    }

    #[test]
    fn script_src_matches_known_domain() {
        let html = r#"<html><head>
            <script src="https://www.google-analytics.com/analytics.js"></script>
        </head></html>"#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(services(&found), vec!["google_analytics"]);
        match &found[0].evidence {
            Evidence::Element {
                element_type,
                element_data,
            } => {
                assert_eq!(element_type, "script");
                assert!(element_data.contains("google-analytics.com"));
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn inline_init_pattern_extracts_id() {
        let html = r#"<script>
            window.dataLayer = window.dataLayer || [];
            gtag('config', 'G-ABCD1234');
        </script>"#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, "google_analytics");
        assert_eq!(found[0].extracted_id.as_deref(), Some("G-ABCD1234"));
        assert_eq!(found[0].detection_method, DetectionMethod::ExternalHtml);
    }

    #[test]
    fn inline_keyword_fallback_captures_snippet() {
        let html = r#"<script>
            /* bootstrapping */ var h = '_hjSettings placeholder for hotjar widget';
        </script>"#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, "hotjar");
        match &found[0].evidence {
            Evidence::Element { element_data, .. } => {
                assert!(element_data.chars().count() <= 40);
                assert!(element_data.contains("hotjar"));
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn same_service_not_reported_twice_per_element_type() {
        let html = r#"
            <script src="https://www.google-analytics.com/analytics.js"></script>
            <script src="https://www.google-analytics.com/ga.js"></script>
        "#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn meta_with_hinted_name_matches_keywords() {
        let html = r#"<meta name="facebook-domain-verification" content="abc123xyz">"#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(services(&found), vec!["facebook_pixel"]);
        match &found[0].evidence {
            Evidence::Element {
                element_type,
                element_data,
            } => {
                assert_eq!(element_type, "meta");
                assert!(element_data.starts_with("facebook-domain-verification:"));
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn tiny_img_is_treated_as_tracking_pixel() {
        let html = r#"<img src="https://www.facebook.com/tr?id=123456789012345" width="1" height="1">"#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(services(&found), vec!["facebook_pixel"]);
    }

    #[test]
    fn large_img_is_not_a_tracking_pixel() {
        let html = r#"<img src="https://www.facebook.com/tr?id=1" width="400" height="300">"#;
        assert!(BodyScanner::scan_document(&catalog(), html).is_empty());
    }

    #[test]
    fn img_without_dimensions_counts() {
        let html = r#"<img src="https://px.ads.linkedin.com/collect?pid=123456">"#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(services(&found), vec!["linkedin_insight"]);
    }

    #[test]
    fn iframe_src_matches_known_domain() {
        let html = r#"<iframe src="https://www.googletagmanager.com/ns.html?id=GTM-ABC123"></iframe>"#;
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(services(&found), vec!["google_tag_manager"]);
        assert_eq!(found[0].extracted_id.as_deref(), Some("GTM-ABC123"));
    }

    #[test]
    fn malformed_markup_is_tolerated() {
        let html = "<html><script src='https://static.hotjar.com/c/hotjar-123.js'><div><p>";
        let found = BodyScanner::scan_document(&catalog(), html);
        assert_eq!(services(&found), vec!["hotjar"]);
    }

    #[test]
    fn snippet_is_bounded_and_char_aligned() {
        let text = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa hotjar bbbbbbbbbbbbbbbbbbbbbbbb";
        let pos = text.find("hotjar").unwrap();
        let snippet = snippet_around(text, pos);
        assert!(snippet.len() <= 40);
        assert!(snippet.contains("hotjar"));

        // Multi-byte content near the window edges must not split chars.
        let unicode = "ééééééééééééééééééééé hotjar ééééééééééé";
        let pos = unicode.find("hotjar").unwrap();
        let snippet = snippet_around(unicode, pos);
        assert!(snippet.contains("hotjar"));
    }
}
