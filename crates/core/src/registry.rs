use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The reserved registry id. It is always present and cannot be removed.
pub const PRIMARY_DATABASE_ID: &str = "primary";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub description: String,
}

/// Input for registering a new target. Fields are optional here so that
/// missing values surface as validation errors rather than parse errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDatabaseEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
}

/// Persisted registry document: `{ current, databases: { id: entry } }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryState {
    pub current: String,
    pub databases: BTreeMap<String, DatabaseEntry>,
}

impl RegistryState {
    pub fn with_primary(uri: impl Into<String>) -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(
            PRIMARY_DATABASE_ID.to_owned(),
            DatabaseEntry {
                name: "Primary Database".to_owned(),
                uri: uri.into(),
                description: "Main collection database".to_owned(),
            },
        );
        Self {
            current: PRIMARY_DATABASE_ID.to_owned(),
            databases,
        }
    }

    pub fn current_entry(&self) -> Option<&DatabaseEntry> {
        self.databases.get(&self.current)
    }

    /// Restores the registry invariants after loading a hand-edited or
    /// older document: the primary entry exists and `current` resolves.
    pub fn normalize(&mut self, primary: &DatabaseEntry) {
        self.databases
            .entry(PRIMARY_DATABASE_ID.to_owned())
            .or_insert_with(|| primary.clone());
        if !self.databases.contains_key(&self.current) {
            self.current = PRIMARY_DATABASE_ID.to_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_repairs_missing_primary_and_dangling_current() {
        let defaults = RegistryState::with_primary("sqlite://vault.db");
        let primary = defaults.databases[PRIMARY_DATABASE_ID].clone();

        let mut state = RegistryState {
            current: "gone".into(),
            databases: BTreeMap::new(),
        };
        state.normalize(&primary);

        assert_eq!(state.current, PRIMARY_DATABASE_ID);
        assert_eq!(state.current_entry(), Some(&primary));
    }

    #[test]
    fn parses_persisted_document_shape() {
        let raw = r#"{
            "current": "atlas",
            "databases": {
                "primary": {"name": "Primary Database", "uri": "sqlite://a.db", "description": ""},
                "atlas": {"name": "Atlas", "uri": "postgres://db/atlas"}
            }
        }"#;
        let state: RegistryState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.current_entry().unwrap().name, "Atlas");
        assert_eq!(state.databases["atlas"].description, "");
    }
}
