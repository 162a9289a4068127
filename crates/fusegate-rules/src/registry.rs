use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use fusegate_common::command::command_key;

use crate::{Resolution, RuleDocument};

/// Immutable set of named rule documents, loaded once at startup.
///
/// Each `*.json` file in the rule directory becomes one document keyed by
/// its sanitized file stem (`third-party.fuse.json` → `third_party_fuse`).
/// Files that fail to read or parse are logged and skipped; the registry
/// loads whatever remains and startup proceeds.
pub struct RuleRegistry {
    documents: HashMap<String, RuleDocument>,
}

impl RuleRegistry {
    pub fn load(dir: &Path) -> Self {
        let mut documents = HashMap::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Rule directory unreadable, starting with no rule documents"
                );
                return Self { documents };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = command_key(stem);

            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<RuleDocument>(&text).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(document) => {
                    tracing::info!(
                        name = %name,
                        global_rules = document.global.len(),
                        command_overrides = document.commands.len(),
                        "Loaded rule document"
                    );
                    documents.insert(name, document);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load rule document, skipping"
                    );
                }
            }
        }

        Self { documents }
    }

    /// Builds a registry directly from documents, for tests and embedding.
    pub fn from_documents(documents: HashMap<String, RuleDocument>) -> Self {
        Self { documents }
    }

    /// Resolution order: the command's own list if present (an empty list
    /// means the command opted out), else the non-empty `global` list,
    /// else nothing.
    pub fn resolve(&self, set_name: &str, command: &str) -> Resolution<'_> {
        let Some(document) = self.documents.get(set_name) else {
            return Resolution::None;
        };
        if let Some(rules) = document.commands.get(command) {
            if rules.is_empty() {
                return Resolution::Ignored;
            }
            return Resolution::Rules(Cow::Borrowed(rules));
        }
        if !document.global.is_empty() {
            return Resolution::Rules(Cow::Borrowed(&document.global));
        }
        Resolution::None
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
