//! String-keyed parameter store.
//!
//! External configuration collaborators (file readers, launch wiring) feed
//! the session layer through this one `mapping<string,string>` interface;
//! the core never parses config formats beyond the flat JSON object
//! loader below.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    values: HashMap<String, String>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads parameters from a flat JSON object file
    /// (`{"key": "value", ...}`).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
        let values: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse parameter file {}", path.display()))?;
        Ok(Self { values })
    }

    pub fn from_iter<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    /// Looks up a parameter that must be present.
    pub fn require(&self, key: &str) -> Result<&String> {
        self.values
            .get(key)
            .with_context(|| format!("Missing required parameter '{}'", key))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_require() {
        let mut store = ParamStore::new();
        store.insert("bus.exchange", "trading");

        assert_eq!(store.get("bus.exchange").map(String::as_str), Some("trading"));
        assert!(store.require("bus.exchange").is_ok());
        assert!(store.require("bus.connection").is_err());
    }
}
