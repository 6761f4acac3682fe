//! The catalog of callable Alpha Vantage functions.
//!
//! Loaded from a JSON array of `{function, description, parameters}`
//! entries. The catalog is what function routing indexes and searches.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One callable API function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub function: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

impl CatalogEntry {
    /// Names of parameters the function cannot be called without.
    ///
    /// Parameters may be given as a JSON schema (`required` array) or as a
    /// plain `{name: description}` map, where descriptions containing
    /// "required" mark the mandatory ones.
    pub fn required_parameters(&self) -> Vec<String> {
        if let Some(required) = self.parameters.get("required").and_then(Value::as_array) {
            return required
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
        }
        match &self.parameters {
            Value::Object(map) => map
                .iter()
                .filter(|(_, v)| {
                    v.as_str()
                        .map(|s| s.to_ascii_lowercase().starts_with("required"))
                        .unwrap_or(false)
                })
                .map(|(k, _)| k.clone())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Ordered, name-indexed set of catalog entries.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
}

impl FunctionCatalog {
    /// Build a catalog from entries. Later duplicates replace earlier ones.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            match catalog.by_name.get(&entry.function) {
                Some(&i) => {
                    tracing::warn!("Duplicate catalog function '{}'", entry.function);
                    catalog.entries[i] = entry;
                }
                None => {
                    catalog
                        .by_name
                        .insert(entry.function.clone(), catalog.entries.len());
                    catalog.entries.push(entry);
                }
            }
        }
        catalog
    }

    /// Load the catalog file.
    ///
    /// A missing or malformed file is logged and yields an empty catalog;
    /// routing then reports `EmptyCatalog` instead of the process failing.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Cannot read function catalog {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str::<Vec<CatalogEntry>>(&text) {
            Ok(entries) => {
                let catalog = Self::from_entries(entries);
                tracing::debug!(
                    "Loaded {} catalog functions from {}",
                    catalog.len(),
                    path.display()
                );
                catalog
            }
            Err(e) => {
                tracing::error!("Malformed function catalog {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, function: &str) -> Option<&CatalogEntry> {
        self.by_name.get(function).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, function: &str) -> bool {
        self.by_name.contains_key(function)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn entry(function: &str, description: &str, parameters: Value) -> CatalogEntry {
        CatalogEntry {
            function: function.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"function": "GLOBAL_QUOTE", "description": "Latest price", "parameters": {{"symbol": "Required"}}}},
               {{"function": "MARKET_STATUS", "description": "Open markets"}}]"#
        )
        .unwrap();

        let catalog = FunctionCatalog::load(file.path());
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("GLOBAL_QUOTE").unwrap().description, "Latest price");
        assert_eq!(catalog.get("MARKET_STATUS").unwrap().parameters, Value::Null);
        assert!(catalog.contains("MARKET_STATUS"));
    }

    #[test]
    fn test_missing_or_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FunctionCatalog::load(&dir.path().join("nope.json")).is_empty());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(FunctionCatalog::load(&bad).is_empty());
    }

    #[test]
    fn test_duplicates_replace() {
        let catalog = FunctionCatalog::from_entries(vec![
            entry("OVERVIEW", "old", Value::Null),
            entry("OVERVIEW", "new", Value::Null),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("OVERVIEW").unwrap().description, "new");
    }

    #[test]
    fn test_required_parameters() {
        let plain = entry(
            "TIME_SERIES_DAILY",
            "daily",
            json!({"symbol": "Required. The ticker", "outputsize": "Optional. compact or full"}),
        );
        assert_eq!(plain.required_parameters(), vec!["symbol".to_string()]);

        let schema = entry(
            "FX_DAILY",
            "fx",
            json!({"type": "object", "required": ["from_symbol", "to_symbol"]}),
        );
        assert_eq!(schema.required_parameters(), vec!["from_symbol", "to_symbol"]);
    }

    #[test]
    fn test_shipped_catalog_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/functions.json");
        let catalog = FunctionCatalog::load(&path);
        assert!(catalog.len() > 20);
        assert_eq!(
            catalog.get("GLOBAL_QUOTE").unwrap().required_parameters(),
            vec!["symbol"]
        );
        assert!(catalog.get("MARKET_STATUS").unwrap().required_parameters().is_empty());
    }
}
