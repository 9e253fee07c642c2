//! Head-time suppression emitter.
//!
//! The emitted script must run before any third-party tag: it defines the
//! no-op stand-ins and disable flags each enabled script-type service
//! checks at initialization. Emission is gated on the visitor's opt-out
//! state; with no opt-out cookie the emitter produces nothing at all.

use crate::catalog::{Catalog, OptOutType};
use crate::enforce::OptOutState;
use crate::settings::TrackerSettings;

/// Build the suppression script for one page render. Returns an empty
/// string while the visitor is in the Tracking state.
///
/// Settings entries whose service is missing from the catalog are skipped
/// silently; emitting a half-known snippet would be worse than emitting
/// nothing.
pub fn head_snippet(catalog: &Catalog, settings: &TrackerSettings, state: OptOutState) -> String {
    if !state.is_opted_out() {
        return String::new();
    }

    let mut out = String::from("(function() {\n");
    for def in catalog.iter() {
        let Some(config) = settings.get(&def.service_id) else {
            continue;
        };
        if !config.enabled || def.opt_out_type != OptOutType::Script {
            continue;
        }
        let Some(suppress) = def.suppression else {
            continue;
        };
        out.push_str(&suppress(config));
    }
    out.push_str("console.log('notrack: visitor opted out, tracking suppressed');\n})();\n");
    out
}
