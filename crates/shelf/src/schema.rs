use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Persisted description of the store layout, written to `schema.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Index name to key path.
    #[serde(default)]
    pub indices: BTreeMap<String, Vec<String>>,
}

impl Schema {
    /// Returns the table, creating it if needed. Safe to call on every upgrade.
    pub fn create_table(&mut self, name: &str) -> &mut TableSchema {
        self.tables.entry(name.to_string()).or_default()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }
}

impl TableSchema {
    pub fn create_index(&mut self, name: &str, key_path: &[&str]) -> &mut Self {
        self.indices.insert(
            name.to_string(),
            key_path.iter().map(|f| f.to_string()).collect(),
        );
        self
    }
}
