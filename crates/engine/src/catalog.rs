use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use collection_vault_core::naming::{is_archive_file_name, timestamp_of};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid backup file name: {0}")]
    InvalidName(String),
    #[error("backup file not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
    pub timestamp: String,
}

/// The archives available in a backups directory.
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    dir: PathBuf,
}

impl ArchiveCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archives newest first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<ArchiveInfo>, CatalogError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !is_archive_file_name(&filename) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            archives.push(ArchiveInfo {
                timestamp: timestamp_of(&filename).unwrap_or_default().to_owned(),
                created: meta.modified().map(DateTime::<Utc>::from)?,
                size_bytes: meta.len(),
                filename,
            });
        }
        archives.sort_by(|a, b| b.created.cmp(&a.created).then(b.filename.cmp(&a.filename)));
        Ok(archives)
    }

    /// Path of an existing archive, after rejecting anything that is not a
    /// plain `backup-*.zip` file name.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, CatalogError> {
        if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
            return Err(CatalogError::InvalidName(filename.to_owned()));
        }
        if !is_archive_file_name(filename) {
            return Err(CatalogError::InvalidName(filename.to_owned()));
        }
        let path = self.dir.join(filename);
        if !path.is_file() {
            return Err(CatalogError::NotFound(filename.to_owned()));
        }
        Ok(path)
    }

    pub fn delete(&self, filename: &str) -> Result<(), CatalogError> {
        let path = self.resolve(filename)?;
        fs::remove_file(&path)?;
        info!(%filename, "deleted backup archive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_backup_archives() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("backup-2024-01-01T00-00-00-000Z.zip"), b"zip").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(tmp.path().join("backup-2024-01-02T00-00-00-000Z")).unwrap();

        let list = ArchiveCatalog::new(tmp.path()).list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].timestamp, "2024-01-01T00-00-00-000Z");
        assert_eq!(list[0].size_bytes, 3);
    }

    #[test]
    fn missing_directory_lists_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let catalog = ArchiveCatalog::new(tmp.path().join("backups"));
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn resolve_rejects_traversal_and_foreign_names() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let catalog = ArchiveCatalog::new(tmp.path());
        for bad in ["../backup-x.zip", "a/backup-x.zip", "backup-x.tar", "x.zip"] {
            assert!(
                matches!(catalog.resolve(bad), Err(CatalogError::InvalidName(_))),
                "{bad}"
            );
        }
        assert!(matches!(
            catalog.resolve("backup-missing.zip"),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn delete_removes_archive() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let name = "backup-2024-01-01T00-00-00-000Z.zip";
        fs::write(tmp.path().join(name), b"zip").unwrap();
        let catalog = ArchiveCatalog::new(tmp.path());
        catalog.delete(name).unwrap();
        assert!(catalog.list().unwrap().is_empty());
    }
}
