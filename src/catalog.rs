//! Registry of known tracking services and their detection metadata.
//!
//! Definitions are declarative data: keyword substrings, hostname fragments
//! and regexes, compiled and validated once when the catalog is built. A
//! malformed pattern fails catalog construction instead of surfacing on the
//! first scan. Each script-type service also registers its suppression
//! snippet builder here, so the emitter dispatch table cannot drift from the
//! catalog entries.

use anyhow::{bail, Context, Result};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::enforce::escape::escape_js;
use crate::settings::TrackerConfig;

pub const COOKIE_MAX_AGE_SECS: u64 = 31_536_000; // 1 year

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptOutType {
    /// Suppressed by pre-empting the service's initialization script.
    Script,
    /// Suppressed by setting a cookie the service recognizes.
    Cookie,
}

/// An opt-out cookie written by the client handler when the visitor opts
/// out. For cookie-type services this is the enforcement mechanism itself;
/// script-type services may carry one as a preference marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub max_age: u64,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl CookieSpec {
    fn site_wide(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            max_age: COOKIE_MAX_AGE_SECS,
            path: "/".to_string(),
            domain: None,
        }
    }
}

/// Builds the head-time suppression snippet for one enabled service.
pub type SuppressionFn = fn(&TrackerConfig) -> String;

#[derive(Debug, Clone)]
pub struct TrackerDefinition {
    pub service_id: String,
    pub label: String,
    pub description: String,
    pub opt_out_type: OptOutType,
    /// Ordered configuration field names (values default to empty).
    pub parameters: Vec<String>,
    /// Case-insensitive substrings indicating probable presence. Stored
    /// lowercase; matched against lowercased content.
    pub keywords: Vec<String>,
    /// Extracts a service identifier from matched evidence text.
    pub id_pattern: Option<Regex>,
    /// Hostname/path fragments of the service's script and pixel URLs.
    pub known_domains: Vec<String>,
    /// Precise initialization-call shapes with one capture group, for
    /// high-confidence id extraction from inline scripts.
    pub init_patterns: Vec<Regex>,
    /// Cookies the client handler writes on opt-out.
    pub opt_out_cookies: Vec<CookieSpec>,
    pub suppression: Option<SuppressionFn>,
}

impl TrackerDefinition {
    /// True if any keyword occurs in the given lowercased text. The first
    /// hit decides; remaining keywords are not checked.
    pub fn matches_keywords(&self, lowercased: &str) -> bool {
        self.keywords.iter().any(|k| lowercased.contains(k))
    }

    pub fn matches_url(&self, url: &str) -> bool {
        self.known_domains.iter().any(|d| url.contains(d))
    }

    /// First `id_pattern` capture in `text`, if any.
    pub fn extract_id(&self, text: &str) -> Option<String> {
        let re = self.id_pattern.as_ref()?;
        first_capture(re, text)
    }

    /// First init-pattern match in `text`: `(extracted id, matched call)`.
    pub fn extract_init(&self, text: &str) -> Option<(String, String)> {
        for re in &self.init_patterns {
            if let Some(caps) = re.captures(text) {
                let id = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())?;
                let matched = caps.get(0).map(|m| m.as_str().to_string())?;
                return Some((id, matched));
            }
        }
        None
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
}

/// Hook for external code to add or remove catalog entries before the
/// catalog is validated and indexed.
pub type CatalogExtension = fn(&mut Vec<TrackerDefinition>);

/// Ordered, validated collection of tracker definitions.
pub struct Catalog {
    entries: Vec<TrackerDefinition>,
    index: FxHashMap<String, usize>,
}

impl Catalog {
    /// The built-in service set.
    pub fn builtin() -> Result<Self> {
        Self::with_extensions(&[])
    }

    pub fn with_extensions(extensions: &[CatalogExtension]) -> Result<Self> {
        let mut entries = builtin_definitions()?;
        for extend in extensions {
            extend(&mut entries);
        }
        Self::from_entries(entries)
    }

    fn from_entries(entries: Vec<TrackerDefinition>) -> Result<Self> {
        let mut index = FxHashMap::default();
        for (i, def) in entries.iter().enumerate() {
            if index.insert(def.service_id.clone(), i).is_some() {
                bail!("Duplicate service id in catalog: {}", def.service_id);
            }
            if def.opt_out_type == OptOutType::Cookie && def.opt_out_cookies.is_empty() {
                bail!(
                    "Cookie-type service {} has no opt-out cookie",
                    def.service_id
                );
            }
        }
        Ok(Self { entries, index })
    }

    pub fn get(&self, service_id: &str) -> Option<&TrackerDefinition> {
        self.index.get(service_id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.index.contains_key(service_id)
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackerDefinition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Convenience builder used by `builtin_definitions`.
struct Def {
    service_id: &'static str,
    label: &'static str,
    description: &'static str,
    opt_out_type: OptOutType,
    parameters: &'static [&'static str],
    keywords: &'static [&'static str],
    id_pattern: Option<&'static str>,
    known_domains: &'static [&'static str],
    init_patterns: &'static [&'static str],
    opt_out_cookies: Vec<CookieSpec>,
    suppression: Option<SuppressionFn>,
}

impl Def {
    fn compile(self) -> Result<TrackerDefinition> {
        let id_pattern = self
            .id_pattern
            .map(|p| {
                Regex::new(p).with_context(|| {
                    format!("Invalid id_pattern for service {}", self.service_id)
                })
            })
            .transpose()?;
        let init_patterns = self
            .init_patterns
            .iter()
            .map(|p| {
                Regex::new(p).with_context(|| {
                    format!("Invalid init_pattern for service {}", self.service_id)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TrackerDefinition {
            service_id: self.service_id.to_string(),
            label: self.label.to_string(),
            description: self.description.to_string(),
            opt_out_type: self.opt_out_type,
            parameters: self.parameters.iter().map(|s| s.to_string()).collect(),
            keywords: self.keywords.iter().map(|s| s.to_lowercase()).collect(),
            id_pattern,
            known_domains: self.known_domains.iter().map(|s| s.to_string()).collect(),
            init_patterns,
            opt_out_cookies: self.opt_out_cookies,
            suppression: self.suppression,
        })
    }
}

fn builtin_definitions() -> Result<Vec<TrackerDefinition>> {
    let defs = vec![
        Def {
            service_id: "google_analytics",
            label: "Google Analytics",
            description: "Prevents Google Analytics from tracking page views and user interactions.",
            opt_out_type: OptOutType::Script,
            parameters: &["tracking_id"],
            keywords: &[
                "google-analytics.com",
                "gtag(",
                "ga('create'",
                "_gaq.push",
                "__gatracker",
            ],
            id_pattern: Some(r"\b(UA-\d{4,10}-\d{1,4}|G-[A-Z0-9]{4,12})\b"),
            known_domains: &["google-analytics.com", "analytics.google.com"],
            init_patterns: &[
                r"gtag\(\s*'config'\s*,\s*'(UA-\d{4,10}-\d{1,4}|G-[A-Z0-9]{4,12})'",
                r#"ga\(\s*['"]create['"]\s*,\s*['"](UA-\d{4,10}-\d{1,4})['"]"#,
            ],
            opt_out_cookies: vec![CookieSpec::site_wide("ga_opt_out", "true")],
            suppression: Some(suppress_google_analytics),
        },
        Def {
            service_id: "google_tag_manager",
            label: "Google Tag Manager",
            description: "Blocks Tag Manager containers from injecting downstream tags.",
            opt_out_type: OptOutType::Script,
            parameters: &["container_id"],
            keywords: &["googletagmanager.com/gtm.js", "'gtm.start'", "\"gtm.start\""],
            id_pattern: Some(r"\b(GTM-[A-Z0-9]{4,8})\b"),
            known_domains: &["googletagmanager.com"],
            init_patterns: &[r"gtm\.js\?id=(GTM-[A-Z0-9]{4,8})"],
            opt_out_cookies: vec![],
            suppression: Some(suppress_google_tag_manager),
        },
        Def {
            service_id: "microsoft_clarity",
            label: "Microsoft Clarity",
            description: "Disables Microsoft Clarity session recording and heatmap functionality.",
            opt_out_type: OptOutType::Script,
            parameters: &[],
            keywords: &["clarity.ms", "clarity(\"set\"", "window.clarity"],
            id_pattern: Some(r"clarity\.ms/tag/([a-z0-9]{8,12})"),
            known_domains: &["clarity.ms"],
            init_patterns: &[r#""clarity"\s*,\s*"script"\s*,\s*"([a-z0-9]{8,12})""#],
            opt_out_cookies: vec![CookieSpec::site_wide("clarity_opt_out", "true")],
            suppression: Some(suppress_microsoft_clarity),
        },
        Def {
            service_id: "hotjar",
            label: "Hotjar",
            description: "Sets the _hjOptOut cookie to prevent Hotjar from collecting data.",
            opt_out_type: OptOutType::Cookie,
            parameters: &["site_id"],
            keywords: &["hotjar", "hjsv", "_hjsettings"],
            id_pattern: Some(r"hjid\s*[:=]\s*(\d{6,8})"),
            known_domains: &["hotjar.com", "hotjar.io"],
            init_patterns: &[r"hjid\s*:\s*(\d{6,8})"],
            opt_out_cookies: vec![CookieSpec::site_wide("_hjOptOut", "1")],
            suppression: None,
        },
        Def {
            service_id: "facebook_pixel",
            label: "Facebook Pixel",
            description: "Stubs out the fbq queue so the Meta pixel never initializes.",
            opt_out_type: OptOutType::Script,
            parameters: &["pixel_id"],
            keywords: &[
                "connect.facebook.net",
                "fbq(",
                "facebook pixel",
                "facebook-domain-verification",
            ],
            id_pattern: Some(r"\b(\d{15,16})\b"),
            known_domains: &["connect.facebook.net", "facebook.com/tr"],
            init_patterns: &[r"fbq\(\s*'init'\s*,\s*'(\d{15,16})'"],
            opt_out_cookies: vec![],
            suppression: Some(suppress_facebook_pixel),
        },
        Def {
            service_id: "linkedin_insight",
            label: "LinkedIn Insight Tag",
            description: "Clears the partner id list the Insight tag reads at startup.",
            opt_out_type: OptOutType::Script,
            parameters: &["partner_id"],
            keywords: &["snap.licdn.com", "_linkedin_partner_id"],
            // Imprecise: bare 6-8 digit runs also occur in unrelated content,
            // so extracted ids from keyword evidence can be false positives.
            id_pattern: Some(r"\b(\d{6,8})\b"),
            known_domains: &["snap.licdn.com", "px.ads.linkedin.com"],
            init_patterns: &[r#"_linkedin_partner_id\s*=\s*["'](\d{6,8})["']"#],
            opt_out_cookies: vec![],
            suppression: Some(suppress_linkedin_insight),
        },
        Def {
            service_id: "twitter_pixel",
            label: "Twitter Pixel",
            description: "Stubs out the twq queue used by the Twitter/X ads pixel.",
            opt_out_type: OptOutType::Script,
            parameters: &[],
            keywords: &["static.ads-twitter.com", "twq("],
            id_pattern: None,
            known_domains: &["ads-twitter.com", "t.co/i/adsct"],
            init_patterns: &[r"twq\(\s*'init'\s*,\s*'([a-z0-9]{5,6})'"],
            opt_out_cookies: vec![],
            suppression: Some(suppress_twitter_pixel),
        },
        Def {
            service_id: "pinterest_tag",
            label: "Pinterest Tag",
            description: "Stubs out the pintrk queue before the Pinterest tag loads.",
            opt_out_type: OptOutType::Script,
            parameters: &[],
            keywords: &["s.pinimg.com/ct/core.js", "pintrk("],
            id_pattern: Some(r"pintrk\(\s*'load'\s*,\s*'(\d{13})'"),
            known_domains: &["pinimg.com/ct", "ct.pinterest.com"],
            init_patterns: &[r"pintrk\(\s*'load'\s*,\s*'(\d{13})'"],
            opt_out_cookies: vec![],
            suppression: Some(suppress_pinterest_tag),
        },
        Def {
            service_id: "matomo",
            label: "Matomo",
            description: "Pushes Matomo's documented optUserOut command before the tracker runs.",
            opt_out_type: OptOutType::Script,
            parameters: &["site_id"],
            keywords: &["matomo.js", "piwik.js", "_paq.push"],
            id_pattern: Some(r#"setSiteId['"]?\s*,\s*['"]?(\d{1,6})"#),
            known_domains: &["matomo.cloud", "matomo.php", "piwik.php"],
            init_patterns: &[r#"_paq\.push\(\[\s*['"]setSiteId['"]\s*,\s*['"]?(\d{1,6})"#],
            opt_out_cookies: vec![],
            suppression: Some(suppress_matomo),
        },
        Def {
            service_id: "hubspot",
            label: "HubSpot",
            description: "Sets the __hs_opt_out cookie HubSpot analytics honors.",
            opt_out_type: OptOutType::Cookie,
            parameters: &["hub_id"],
            keywords: &["js.hs-scripts.com", "_hsq.push", "hs-analytics"],
            id_pattern: Some(r"hs-scripts\.com/(\d{6,9})\.js"),
            known_domains: &["hs-scripts.com", "hs-analytics.net", "hubspot.com"],
            init_patterns: &[],
            opt_out_cookies: vec![CookieSpec::site_wide("__hs_opt_out", "yes")],
            suppression: None,
        },
    ];

    defs.into_iter().map(Def::compile).collect()
}

// --- Suppression snippet builders ---
//
// Each builder returns the JavaScript that pre-empts one service, assuming
// it runs before the service's own tag. Identifiers coming from
// configuration are escaped for the script context.

fn suppress_google_analytics(config: &TrackerConfig) -> String {
    let tracking_id = escape_js(config.param_or_id("tracking_id"));
    format!(
        "// Disable Google Analytics\n\
         window['ga-disable-{tracking_id}'] = true;\n\
         window.dataLayer = window.dataLayer || [];\n\
         function gtag() {{ dataLayer.push(arguments); }}\n\
         gtag('consent', 'default', {{ 'analytics_storage': 'denied' }});\n"
    )
}

fn suppress_google_tag_manager(_config: &TrackerConfig) -> String {
    "// Disable Google Tag Manager containers\n\
     window.dataLayer = window.dataLayer || [];\n\
     window.dataLayer.push({ 'gtm.blocklist': ['customScripts', 'nonGoogleScripts'] });\n"
        .to_string()
}

fn suppress_microsoft_clarity(_config: &TrackerConfig) -> String {
    "// Disable Microsoft Clarity\n\
     window['clarity'] = window['clarity'] || function() {};\n\
     window['clarity'].q = [];\n\
     window['clarity'].q.push(['disable', true]);\n"
        .to_string()
}

fn suppress_facebook_pixel(_config: &TrackerConfig) -> String {
    "// Disable Facebook Pixel\n\
     window.fbq = function() {};\n\
     window.fbq.queue = [];\n\
     window.fbq.loaded = true;\n\
     window.fbq.disablePushState = true;\n"
        .to_string()
}

fn suppress_linkedin_insight(_config: &TrackerConfig) -> String {
    "// Disable LinkedIn Insight Tag\n\
     window._linkedin_data_partner_ids = [];\n\
     window._linkedin_partner_id = null;\n"
        .to_string()
}

fn suppress_twitter_pixel(_config: &TrackerConfig) -> String {
    "// Disable Twitter Pixel\n\
     window.twq = function() {};\n\
     window.twq.queue = [];\n"
        .to_string()
}

fn suppress_pinterest_tag(_config: &TrackerConfig) -> String {
    "// Disable Pinterest Tag\n\
     window.pintrk = function() {};\n\
     window.pintrk.queue = [];\n"
        .to_string()
}

fn suppress_matomo(_config: &TrackerConfig) -> String {
    "// Disable Matomo\n\
     window._paq = window._paq || [];\n\
     window._paq.push(['optUserOut']);\n"
        .to_string()
}
