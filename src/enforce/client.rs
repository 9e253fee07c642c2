//! Client-time opt-out handler, generated per site configuration.
//!
//! The script carries its configuration (enabled trackers, their opt-out
//! cookies, custom trigger selectors) as an embedded JSON literal. All
//! cookie writes happen in the browser; the page reloads afterwards so
//! the head-time emitter re-runs with the new state.

use serde::Serialize;

use crate::catalog::Catalog;
use crate::enforce::OPT_OUT_COOKIE;
use crate::settings::TrackerSettings;

#[derive(Serialize)]
struct ClientCookie<'a> {
    name: &'a str,
    value: &'a str,
    #[serde(rename = "maxAge")]
    max_age: u64,
    path: &'a str,
}

#[derive(Serialize)]
struct ClientTracker<'a> {
    service: &'a str,
    cookies: Vec<ClientCookie<'a>>,
}

#[derive(Serialize)]
struct ClientConfig<'a> {
    #[serde(rename = "optOutCookie")]
    opt_out_cookie: &'a str,
    #[serde(rename = "maxAge")]
    max_age: u64,
    trackers: Vec<ClientTracker<'a>>,
    triggers: Vec<String>,
}

/// Split the stored comma-separated selector list. Selector syntax is not
/// validated here; the browser side catches bad selectors per-trigger.
pub fn parse_triggers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn client_script(
    catalog: &Catalog,
    settings: &TrackerSettings,
    custom_triggers: &str,
) -> String {
    let trackers = catalog
        .iter()
        .filter(|def| {
            settings
                .get(&def.service_id)
                .map(|c| c.enabled)
                .unwrap_or(false)
        })
        .map(|def| ClientTracker {
            service: &def.service_id,
            cookies: def
                .opt_out_cookies
                .iter()
                .map(|c| ClientCookie {
                    name: &c.name,
                    value: &c.value,
                    max_age: c.max_age,
                    path: &c.path,
                })
                .collect(),
        })
        .collect();

    let config = ClientConfig {
        opt_out_cookie: OPT_OUT_COOKIE,
        max_age: crate::catalog::COOKIE_MAX_AGE_SECS,
        trackers,
        triggers: parse_triggers(custom_triggers),
    };
    // serde_json never fails on these in-memory structs.
    let config_json = serde_json::to_string(&config).unwrap();

    TEMPLATE.replace("__NOTRACK_CONFIG__", &config_json)
}

const TEMPLATE: &str = r#"(function () {
  'use strict';

  var config = __NOTRACK_CONFIG__;

  function setCookie(name, value, maxAge, path) {
    var cookie = name + '=' + value + '; max-age=' + maxAge + '; path=' + path + '; SameSite=Lax';
    if (window.location.protocol === 'https:') {
      cookie += '; Secure';
    }
    document.cookie = cookie;
  }

  function clearCookie(name, path) {
    document.cookie = name + '=; max-age=0; path=' + path + ';';
  }

  function getCookie(name) {
    var value = '; ' + document.cookie;
    var parts = value.split('; ' + name + '=');
    if (parts.length === 2) return parts.pop().split(';').shift();
    return null;
  }

  function optedOut() {
    return getCookie(config.optOutCookie) === 'true';
  }

  function optOut() {
    setCookie(config.optOutCookie, 'true', config.maxAge, '/');
    config.trackers.forEach(function (tracker) {
      tracker.cookies.forEach(function (c) {
        setCookie(c.name, c.value, c.maxAge, c.path);
      });
    });
    // Reload so the suppression snippet runs with the new state.
    window.location.reload();
  }

  function optIn() {
    setCookie(config.optOutCookie, 'false', config.maxAge, '/');
    config.trackers.forEach(function (tracker) {
      tracker.cookies.forEach(function (c) {
        clearCookie(c.name, c.path);
      });
    });
    window.location.reload();
  }

  function refreshStatus() {
    var out = optedOut();
    document.querySelectorAll('.notrack-status').forEach(function (el) {
      el.classList.toggle('opted-out', out);
      el.textContent = out
        ? 'You have opted out of tracking.'
        : 'Tracking is currently enabled.';
    });
    document.querySelectorAll('.notrack-opt-out-button').forEach(function (el) {
      el.textContent = out ? 'Opt In' : 'Opt Out';
      el.setAttribute('data-action', out ? 'opt-in' : 'opt-out');
    });
  }

  function handleClick(event) {
    event.preventDefault();
    if (optedOut()) {
      optIn();
    } else {
      optOut();
    }
  }

  function bind(selector) {
    try {
      document.querySelectorAll(selector).forEach(function (el) {
        el.addEventListener('click', handleClick);
      });
    } catch (err) {
      console.warn('notrack: invalid trigger selector "' + selector + '":', err);
    }
  }

  function init() {
    refreshStatus();
    bind('.notrack-opt-out-button');
    bind('#notrack-opt-out');
    config.triggers.forEach(bind);
  }

  if (document.readyState === 'loading') {
    document.addEventListener('DOMContentLoaded', init);
  } else {
    init();
  }

  window.notrack_opt_out = optOut;
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TrackerConfig;

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    fn settings(enabled: &[&str]) -> TrackerSettings {
        let mut settings = TrackerSettings::new();
        for id in enabled {
            settings.insert(
                id.to_string(),
                TrackerConfig {
                    enabled: true,
                    ..Default::default()
                },
            );
        }
        settings
    }

    #[test]
    fn enabled_cookie_tracker_cookies_are_embedded() {
        let script = client_script(&catalog(), &settings(&["hotjar"]), "");
        assert!(script.contains("_hjOptOut"));
        assert!(script.contains("\"service\":\"hotjar\""));
    }

    #[test]
    fn disabled_trackers_are_absent() {
        let script = client_script(&catalog(), &settings(&["hotjar"]), "");
        assert!(!script.contains("__hs_opt_out"));
        assert!(!script.contains("hubspot"));
    }

    #[test]
    fn custom_triggers_pass_through_verbatim() {
        let script = client_script(
            &catalog(),
            &settings(&[]),
            ".privacy-button, #opt-out-link",
        );
        assert!(script.contains("\".privacy-button\""));
        assert!(script.contains("\"#opt-out-link\""));
    }

    #[test]
    fn main_cookie_and_lifetime_are_present() {
        let script = client_script(&catalog(), &settings(&[]), "");
        assert!(script.contains("notrack_opted_out"));
        assert!(script.contains("31536000"));
        // Placeholder fully substituted.
        assert!(!script.contains("__NOTRACK_CONFIG__"));
    }

    #[test]
    fn trigger_parsing_trims_and_drops_empties() {
        assert_eq!(
            parse_triggers(" .a , #b ,, "),
            vec![".a".to_string(), "#b".to_string()]
        );
        assert!(parse_triggers("").is_empty());
    }
}
