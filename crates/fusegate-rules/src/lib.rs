//! Rule documents, resolution, and the windowed-metric evaluator.
//!
//! Rule sets are named JSON documents loaded once at startup
//! ([`registry::RuleRegistry`]). Per-request headers may replace a resolved
//! rule list ([`override_header`]). The [`evaluator`] turns rules plus the
//! telemetry windows into alarm and fuse decisions with probability gating.

pub mod evaluator;
pub mod feature;
pub mod override_header;
pub mod registry;


use std::borrow::Cow;
use std::collections::HashMap;

use serde::Deserialize;

pub use feature::{Feature, Scope};

/// Errors raised while parsing rules from documents or headers.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// A rule names a metric this engine does not compute.
    #[error("Rules: unknown feature '{0}'")]
    UnknownFeature(String),

    /// An override header tuple did not parse; the whole header is
    /// discarded rather than partially applied.
    #[error("Rules: malformed override tuple '{0}'")]
    MalformedOverride(String),
}

fn default_probability() -> f64 {
    100.0
}

/// One threshold rule.
///
/// `threshold` is inclusive. `probability` is the percentage of trigger
/// events that actually fire, letting a fraction of traffic keep probing an
/// open breaker; it defaults to firing always.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rule {
    pub feature: Feature,
    pub duration: u64,
    pub threshold: f64,
    #[serde(default = "default_probability")]
    pub probability: f64,
}

/// One named rule document: a `global` list plus per-command overrides.
/// An empty per-command list is the ignore sentinel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub global: Vec<Rule>,
    #[serde(default)]
    pub commands: HashMap<String, Vec<Rule>>,
}

/// Outcome of resolving a rule set for a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Rules(Cow<'a, [Rule]>),
    /// `commands[command]` was present and empty: the command is opted out.
    Ignored,
    /// No matching rule set or no applicable rules.
    None,
}

impl Resolution<'_> {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Resolution::Ignored)
    }
}

/// Resolves a rule set through the registry, honoring a per-request
/// override header when it parses cleanly.
///
/// A present, non-blank header replaces whatever the registry resolves,
/// including the ignore sentinel. A malformed header is rejected as a whole
/// and logged; resolution then falls back to the registry.
pub fn resolve_rules<'a>(
    registry: &'a registry::RuleRegistry,
    set_name: &str,
    command: &str,
    override_header: Option<&str>,
) -> Resolution<'a> {
    if let Some(header) = override_header {
        if !header.trim().is_empty() {
            match override_header::parse_override(header) {
                Ok(rules) => return Resolution::Rules(Cow::Owned(rules)),
                Err(e) => {
                    tracing::warn!(set_name, command, error = %e, "Rule override header rejected");
                }
            }
        }
    }
    registry.resolve(set_name, command)
}
