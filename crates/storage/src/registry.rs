use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use collection_vault_core::{DatabaseEntry, NewDatabaseEntry, RegistryState, PRIMARY_DATABASE_ID};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::store::{ping, redact_uri};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("database id already exists: {0}")]
    DuplicateId(String),
    #[error("cannot remove the {0} database")]
    ProtectedId(String),
    #[error("database configuration not found: {0}")]
    UnknownId(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Outcome of a connection test. Never mutates the registry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

/// File-backed mapping of database ids to connection targets.
///
/// Every mutation is a read-modify-write of the whole document under an
/// in-process lock, persisted by writing a sibling temp file and renaming it
/// over the registry file.
#[derive(Debug)]
pub struct DatabaseRegistry {
    path: PathBuf,
    primary: DatabaseEntry,
    lock: Mutex<()>,
}

type RegistryResult<T> = std::result::Result<T, RegistryError>;

impl DatabaseRegistry {
    pub fn open(path: impl Into<PathBuf>, primary_uri: &str) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create registry directory {}", parent.display()))?;
        }
        let defaults = RegistryState::with_primary(primary_uri);
        let primary = defaults.databases[PRIMARY_DATABASE_ID].clone();
        let registry = Self {
            path,
            primary,
            lock: Mutex::new(()),
        };
        if !registry.path.exists() {
            registry.save(&defaults)?;
        }
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> RegistryResult<RegistryState> {
        let _guard = self.guard()?;
        Ok(self.load()?)
    }

    /// Fail the way [`add`](Self::add) would for `entry`, without saving.
    pub fn check_new(&self, entry: &NewDatabaseEntry) -> RegistryResult<()> {
        let id = required(entry.id.clone(), "ID")?;
        required(entry.name.clone(), "name")?;
        required(entry.uri.clone(), "URI")?;
        if self.get()?.databases.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        Ok(())
    }

    pub fn add(&self, entry: NewDatabaseEntry) -> RegistryResult<RegistryState> {
        let id = required(entry.id, "ID")?;
        let name = required(entry.name, "name")?;
        let uri = required(entry.uri, "URI")?;

        self.mutate(|state| {
            if state.databases.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            info!(%id, uri = %redact_uri(&uri), "registering database");
            state.databases.insert(
                id,
                DatabaseEntry {
                    name,
                    uri,
                    description: entry.description.unwrap_or_default(),
                },
            );
            Ok(())
        })
    }

    pub fn remove(&self, id: &str) -> RegistryResult<RegistryState> {
        if id == PRIMARY_DATABASE_ID {
            return Err(RegistryError::ProtectedId(id.to_owned()));
        }
        self.mutate(|state| {
            if state.databases.remove(id).is_none() {
                return Err(RegistryError::UnknownId(id.to_owned()));
            }
            if state.current == id {
                state.current = PRIMARY_DATABASE_ID.to_owned();
            }
            info!(%id, current = %state.current, "removed database");
            Ok(())
        })
    }

    pub fn switch_current(&self, id: &str) -> RegistryResult<RegistryState> {
        self.mutate(|state| {
            if !state.databases.contains_key(id) {
                return Err(RegistryError::UnknownId(id.to_owned()));
            }
            state.current = id.to_owned();
            info!(%id, "switched current database");
            Ok(())
        })
    }

    /// The entry for `id`, or the current entry when no id is given.
    pub fn resolve(&self, id: Option<&str>) -> RegistryResult<(String, DatabaseEntry)> {
        let state = self.get()?;
        let id = id.unwrap_or(state.current.as_str()).to_owned();
        let entry = state
            .databases
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownId(id.clone()))?;
        Ok((id, entry))
    }

    /// Check an arbitrary connection string. Nothing is created or migrated
    /// on the target.
    pub async fn test_connection(uri: &str) -> ConnectionTest {
        if uri.trim().is_empty() {
            return ConnectionTest {
                success: false,
                message: "Database URI is required".to_owned(),
            };
        }
        match ping(uri).await {
            Ok(()) => ConnectionTest {
                success: true,
                message: "Database connection test successful".to_owned(),
            },
            Err(e) => ConnectionTest {
                success: false,
                message: format!("Database connection test failed: {e:#}"),
            },
        }
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut RegistryState) -> RegistryResult<()>,
    ) -> RegistryResult<RegistryState> {
        let _guard = self.guard()?;
        let mut state = self.load()?;
        apply(&mut state)?;
        self.save(&state)?;
        Ok(state)
    }

    fn guard(&self) -> anyhow::Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow!("database registry lock poisoned"))
    }

    fn load(&self) -> anyhow::Result<RegistryState> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read database registry {}", self.path.display()))?;
        let mut state: RegistryState = serde_json::from_str(&raw)
            .with_context(|| format!("parse database registry {}", self.path.display()))?;
        state.normalize(&self.primary);
        Ok(state)
    }

    fn save(&self, state: &RegistryState) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let raw = serde_json::to_string_pretty(state).context("serialize database registry")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(raw.as_bytes())
            .context("write database registry")?;
        tmp.as_file().sync_all().context("flush database registry")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace database registry {}", self.path.display()))?;
        Ok(())
    }
}

fn required(value: Option<String>, field: &'static str) -> RegistryResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RegistryError::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(id: &str) -> NewDatabaseEntry {
        NewDatabaseEntry {
            id: Some(id.to_owned()),
            name: Some(format!("{id} db")),
            uri: Some(format!("sqlite:{id}.db")),
            description: None,
        }
    }

    fn registry(dir: &Path) -> DatabaseRegistry {
        DatabaseRegistry::open(dir.join("state").join("databases.json"), "sqlite:primary.db")
            .expect("registry")
    }

    #[test]
    fn fresh_registry_has_primary_as_current() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let state = registry(tmp.path()).get().unwrap();
        assert_eq!(state.current, PRIMARY_DATABASE_ID);
        assert_eq!(state.databases[PRIMARY_DATABASE_ID].uri, "sqlite:primary.db");
    }

    #[test]
    fn add_rejects_missing_fields_and_duplicates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reg = registry(tmp.path());

        let mut missing_uri = new_entry("staging");
        missing_uri.uri = None;
        assert!(matches!(
            reg.add(missing_uri),
            Err(RegistryError::MissingField("URI"))
        ));

        reg.add(new_entry("staging")).unwrap();
        assert!(matches!(
            reg.add(new_entry("staging")),
            Err(RegistryError::DuplicateId(_))
        ));
        assert!(matches!(
            reg.add(new_entry(PRIMARY_DATABASE_ID)),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[test]
    fn primary_cannot_be_removed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reg = registry(tmp.path());
        reg.add(new_entry("staging")).unwrap();
        let before = reg.get().unwrap();

        let err = reg.remove(PRIMARY_DATABASE_ID).unwrap_err();
        assert!(matches!(err, RegistryError::ProtectedId(_)));
        assert!(err.is_validation());
        assert_eq!(reg.get().unwrap(), before);
    }

    #[test]
    fn removing_current_falls_back_to_primary() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reg = registry(tmp.path());
        reg.add(new_entry("staging")).unwrap();
        reg.switch_current("staging").unwrap();

        let state = reg.remove("staging").unwrap();
        assert!(!state.databases.contains_key("staging"));
        assert_eq!(state.current, PRIMARY_DATABASE_ID);
        assert!(matches!(
            reg.remove("staging"),
            Err(RegistryError::UnknownId(_))
        ));
    }

    #[test]
    fn current_always_resolves_after_mixed_operations() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reg = registry(tmp.path());

        let ops: Vec<Box<dyn Fn(&DatabaseRegistry) -> RegistryResult<RegistryState>>> = vec![
            Box::new(|r| r.add(new_entry("a"))),
            Box::new(|r| r.add(new_entry("b"))),
            Box::new(|r| r.switch_current("b")),
            Box::new(|r| r.switch_current("missing")),
            Box::new(|r| r.remove("b")),
            Box::new(|r| r.switch_current("a")),
            Box::new(|r| r.remove(PRIMARY_DATABASE_ID)),
            Box::new(|r| r.remove("a")),
        ];
        for op in ops {
            let _ = op(&reg);
            let state = reg.get().unwrap();
            assert!(state.databases.contains_key(&state.current));
            assert!(state.databases.contains_key(PRIMARY_DATABASE_ID));
        }
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().expect("tempdir");
        {
            let reg = registry(tmp.path());
            reg.add(new_entry("archive")).unwrap();
            reg.switch_current("archive").unwrap();
        }
        let reopened = registry(tmp.path());
        let (id, entry) = reopened.resolve(None).unwrap();
        assert_eq!(id, "archive");
        assert_eq!(entry.uri, "sqlite:archive.db");
    }

    #[tokio::test]
    async fn connection_test_reports_failures_without_touching_state() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reg = registry(tmp.path());
        let before = reg.get().unwrap();

        let bad = DatabaseRegistry::test_connection("redis://localhost").await;
        assert!(!bad.success);
        assert!(bad.message.contains("unsupported"));

        let fresh = tmp.path().join("fresh.db");
        let ok = DatabaseRegistry::test_connection(&format!("sqlite:{}", fresh.display())).await;
        assert!(ok.success, "{}", ok.message);
        assert!(!fresh.exists());

        let orphan = tmp.path().join("missing").join("x.db");
        let unreachable =
            DatabaseRegistry::test_connection(&format!("sqlite:{}", orphan.display())).await;
        assert!(!unreachable.success);
        assert!(unreachable.message.contains("does not exist"));

        assert_eq!(reg.get().unwrap(), before);
    }

    #[test]
    fn check_new_matches_add_without_saving() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reg = registry(tmp.path());
        let before = reg.get().unwrap();

        reg.check_new(&new_entry("staging")).unwrap();
        assert_eq!(reg.get().unwrap(), before);

        let mut nameless = new_entry("staging");
        nameless.name = Some("  ".into());
        assert!(matches!(
            reg.check_new(&nameless),
            Err(RegistryError::MissingField("name"))
        ));
        assert!(matches!(
            reg.check_new(&new_entry(PRIMARY_DATABASE_ID)),
            Err(RegistryError::DuplicateId(_))
        ));
    }
}
