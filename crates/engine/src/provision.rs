//! Stand up a new registered database from an existing backup archive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use collection_vault_core::{DatabaseEntry, NewDatabaseEntry, RestoreSummary};
use collection_vault_storage::{redact_uri, DatabaseRegistry, RegistryError, UriConnector};
use thiserror::Error;
use tracing::{info, warn};

use crate::progress::ProgressSink;
use crate::restore::{run_restore, RestoreConfig};

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Missing fields or an id that is already registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    Unreachable(String),
    #[error("restoring {id} from backup failed: {message}")]
    Restore {
        id: String,
        message: String,
        summary: Option<RestoreSummary>,
    },
}

#[derive(Debug, Clone)]
pub struct ProvisionedDatabase {
    pub id: String,
    pub entry: DatabaseEntry,
    pub summary: RestoreSummary,
    pub duration_ms: u64,
}

/// Restore the collections of `archive_path` into the target described by
/// `request`, then register it. The id is checked before anything runs and
/// the target must pass a connection test. Upload directories are not
/// touched: the new database shares the live file root.
pub async fn create_database_from_backup(
    registry: &DatabaseRegistry,
    archive_path: impl Into<PathBuf>,
    request: NewDatabaseEntry,
    config: RestoreConfig,
) -> Result<ProvisionedDatabase, ProvisionError> {
    let clock = Instant::now();
    registry.check_new(&request)?;
    let id = request.id.clone().unwrap_or_default();
    let uri = request.uri.clone().unwrap_or_default();

    let test = DatabaseRegistry::test_connection(&uri).await;
    if !test.success {
        warn!(%id, uri = %redact_uri(&uri), message = %test.message, "target database unreachable");
        return Err(ProvisionError::Unreachable(test.message));
    }

    info!(%id, uri = %redact_uri(&uri), "creating database from backup");
    let config = RestoreConfig {
        upload_dirs: Vec::new(),
        ..config
    };
    let outcome = run_restore(
        archive_path,
        Arc::new(UriConnector::new(uri)),
        config,
        ProgressSink::detached(),
    )
    .await;

    let summary = match (outcome.success, outcome.summary) {
        (true, Some(summary)) => summary,
        (_, summary) => {
            let message = outcome.error.unwrap_or_else(|| {
                let failed: Vec<&str> = summary
                    .iter()
                    .flat_map(|s| s.failed_collections.iter().map(|f| f.name.as_str()))
                    .collect();
                format!("collections failed: {}", failed.join(", "))
            });
            return Err(ProvisionError::Restore {
                id,
                message,
                summary,
            });
        }
    };

    let state = registry.add(request)?;
    let entry = state
        .databases
        .get(&id)
        .cloned()
        .ok_or_else(|| RegistryError::UnknownId(id.clone()))?;
    info!(%id, documents = summary.total_documents, "database created from backup");
    Ok(ProvisionedDatabase {
        id,
        entry,
        summary,
        duration_ms: clock.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use collection_vault_core::{Document, PRIMARY_DATABASE_ID};
    use serde_json::json;
    use tempfile::TempDir;

    use crate::backup::{run_backup, BackupConfig};

    fn sqlite_uri(dir: &Path, name: &str) -> String {
        format!("sqlite:{}", dir.join(format!("{name}.db")).display())
    }

    fn request(id: &str, uri: String) -> NewDatabaseEntry {
        NewDatabaseEntry {
            id: Some(id.to_owned()),
            name: Some("Restored copy".to_owned()),
            uri: Some(uri),
            description: Some("from last night".to_owned()),
        }
    }

    /// Registry with a seeded primary store and one archive of it.
    async fn fixture(tmp: &TempDir) -> (DatabaseRegistry, PathBuf, RestoreConfig) {
        let primary = sqlite_uri(tmp.path(), "primary");
        let store = collection_vault_storage::connect(&primary).await.unwrap();
        let mut d = Document::new();
        d.insert("_id".into(), json!("e1"));
        store.replace_all("editions", &[d.clone(), d]).await.unwrap();
        store.close().await.unwrap();

        let public = tmp.path().join("public");
        fs::create_dir_all(public.join("uploads")).unwrap();
        fs::write(public.join("uploads/live.png"), b"live").unwrap();

        let backups = tmp.path().join("backups");
        let mut cfg = BackupConfig::new(&backups, &public);
        cfg.collections = vec!["editions".into()];
        let outcome = run_backup(
            Arc::new(UriConnector::new(primary.clone())),
            cfg,
            ProgressSink::detached(),
        )
        .await;
        let archive = outcome.summary.expect("backup").archive_path;

        let registry =
            DatabaseRegistry::open(tmp.path().join("state/databases.json"), &primary).unwrap();
        (registry, archive, RestoreConfig::new(&backups, &public))
    }

    #[tokio::test]
    async fn restores_collections_then_registers_target() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (registry, archive, config) = fixture(&tmp).await;
        let target = sqlite_uri(tmp.path(), "copy");

        let created =
            create_database_from_backup(&registry, &archive, request("copy", target.clone()), config)
                .await
                .unwrap();

        assert_eq!(created.id, "copy");
        assert_eq!(created.entry.uri, target);
        assert_eq!(created.entry.description, "from last night");
        assert_eq!(created.summary.restored_collections, vec!["editions".to_string()]);
        assert!(created.summary.restored_dirs.is_empty());

        let state = registry.get().unwrap();
        assert_eq!(state.databases["copy"].name, "Restored copy");
        assert_eq!(state.current, PRIMARY_DATABASE_ID);

        let store = collection_vault_storage::connect(&target).await.unwrap();
        assert_eq!(store.read_all("editions").await.unwrap().len(), 2);
        assert_eq!(
            fs::read(tmp.path().join("public/uploads/live.png")).unwrap(),
            b"live"
        );
    }

    #[tokio::test]
    async fn taken_id_is_refused_before_the_target_is_touched() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (registry, archive, config) = fixture(&tmp).await;
        let target = tmp.path().join("dup.db");

        let err = create_database_from_backup(
            &registry,
            &archive,
            request(PRIMARY_DATABASE_ID, format!("sqlite:{}", target.display())),
            config,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Registry(RegistryError::DuplicateId(_))
        ));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn unreachable_target_is_not_registered() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (registry, archive, config) = fixture(&tmp).await;
        let before = registry.get().unwrap();

        let err = create_database_from_backup(
            &registry,
            &archive,
            request("nowhere", sqlite_uri(&tmp.path().join("missing"), "x")),
            config,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProvisionError::Unreachable(_)));
        assert_eq!(registry.get().unwrap(), before);
    }

    #[tokio::test]
    async fn failed_restore_is_not_registered() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (registry, _, config) = fixture(&tmp).await;
        let bogus = tmp.path().join("backups/backup-2024-01-01T00-00-00-000Z.zip");
        fs::write(&bogus, b"not a zip").unwrap();

        let err = create_database_from_backup(
            &registry,
            &bogus,
            request("broken", sqlite_uri(tmp.path(), "broken")),
            config,
        )
        .await
        .unwrap_err();

        match err {
            ProvisionError::Restore { id, summary, .. } => {
                assert_eq!(id, "broken");
                assert!(summary.is_none());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!registry.get().unwrap().databases.contains_key("broken"));
    }
}
