//! Language code → display name table.
//! Loads a flat JSON object from disk; falls back to a built-in table.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

const BUILTIN: &[(&str, &str)] = &[
    ("auto", "Auto-detect"),
    ("ru", "Русский"),
    ("en", "English"),
    ("de", "Deutsch"),
    ("fr", "Français"),
    ("es", "Español"),
    ("it", "Italiano"),
    ("pt", "Português"),
    ("zh", "中文"),
    ("ja", "日本語"),
    ("ko", "한국어"),
    ("ar", "العربية"),
];

#[derive(Debug, Error)]
pub enum LanguageTableError {
    #[error("language table IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("language table parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only mapping consumed for prompts and response annotation.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    names: BTreeMap<String, String>,
}

impl LanguageTable {
    /// Load from a JSON file of the form `{"en": "English", ...}`.
    pub fn load_from_file(path: &Path) -> Result<Self, LanguageTableError> {
        let content = std::fs::read_to_string(path)?;
        let names: BTreeMap<String, String> = serde_json::from_str(&content)?;
        Ok(Self { names })
    }

    /// Built-in table used when no file is available.
    pub fn builtin() -> Self {
        Self {
            names: BUILTIN
                .iter()
                .map(|(code, name)| (code.to_string(), name.to_string()))
                .collect(),
        }
    }

    /// Display name, or the uppercased code when unknown.
    pub fn display_name(&self, code: &str) -> String {
        self.names
            .get(code)
            .cloned()
            .unwrap_or_else(|| code.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::builtin()
    }
}
