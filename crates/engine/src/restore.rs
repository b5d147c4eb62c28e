//! Restore orchestration, the reverse of [`crate::backup`]: extract, read
//! the manifest, replace collections, swap upload directories in behind a
//! pre-restore safety copy, clean up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use collection_vault_core::manifest::{DATABASE_DIR, MANIFEST_FILE};
use collection_vault_core::{
    archive_timestamp, BackupManifest, DirectoryFailure, RestoreSummary, RunSummary, UnitFailure,
    ARCHIVE_FORMAT_VERSION,
};
use collection_vault_storage::{DocumentStore, StoreConnector};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::DEFAULT_UPLOAD_DIRS;
use crate::error::{EngineError, Result};
use crate::exporter::{read_snapshot, snapshot_file};
use crate::files::{is_contained, outermost_dirs, FileTree, LocalFileTree};
use crate::progress::ProgressSink;
use crate::{archive, run_blocking};

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Holds the temporary extraction directory and pre-restore copies.
    pub backups_dir: PathBuf,
    /// Live file root the archived upload directories are restored into.
    pub upload_root: PathBuf,
    /// Directories that may be replaced under `upload_root`. Only those the
    /// archive also lists are restored; archives listing none get all of them.
    pub upload_dirs: Vec<String>,
}

impl RestoreConfig {
    pub fn new(backups_dir: impl Into<PathBuf>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            backups_dir: backups_dir.into(),
            upload_root: upload_root.into(),
            upload_dirs: DEFAULT_UPLOAD_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreState {
    Initializing,
    Extracting,
    ValidatingManifest,
    RestoringCollections,
    RestoringFiles,
    CleaningUp,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// False on a fatal error and also when any collection or directory
    /// failed; check `summary` for which.
    pub success: bool,
    pub summary: Option<RestoreSummary>,
    pub error: Option<String>,
    pub states: Vec<RestoreState>,
}

pub async fn run_restore(
    archive_path: impl Into<PathBuf>,
    connector: Arc<dyn StoreConnector>,
    config: RestoreConfig,
    progress: ProgressSink,
) -> RestoreOutcome {
    RestoreOrchestrator::new(archive_path, config, connector, progress)
        .run()
        .await
}

/// Result of swapping one upload directory in.
enum Swap {
    Copied(u64),
    /// Copy-in failed; the live directory was put back from the safety copy.
    RolledBack(io::Error),
    /// Copy-in failed and so did putting the safety copy back.
    Unrecovered(io::Error, io::Error),
}

pub struct RestoreOrchestrator {
    config: RestoreConfig,
    archive_path: PathBuf,
    connector: Arc<dyn StoreConnector>,
    files: Arc<dyn FileTree>,
    progress: ProgressSink,
    run_id: Uuid,
    temp_dir: PathBuf,
    pre_restore_dir: PathBuf,
    state: RestoreState,
    history: Vec<RestoreState>,
    store: Option<Box<dyn DocumentStore>>,
    content_root: PathBuf,
    manifest: Option<BackupManifest>,
    summary: RestoreSummary,
}

impl RestoreOrchestrator {
    pub fn new(
        archive_path: impl Into<PathBuf>,
        config: RestoreConfig,
        connector: Arc<dyn StoreConnector>,
        progress: ProgressSink,
    ) -> Self {
        let archive_path = archive_path.into();
        let run_id = Uuid::new_v4();
        let temp_dir = config.backups_dir.join(format!("temp-restore-{run_id}"));
        let pre_restore_dir = config
            .backups_dir
            .join(format!("pre-restore-{}", archive_timestamp(Utc::now())));
        let summary = RestoreSummary {
            archive: archive_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ..RestoreSummary::default()
        };
        Self {
            config,
            archive_path,
            connector,
            files: Arc::new(LocalFileTree),
            progress,
            run_id,
            content_root: temp_dir.clone(),
            temp_dir,
            pre_restore_dir,
            state: RestoreState::Initializing,
            history: vec![RestoreState::Initializing],
            store: None,
            manifest: None,
            summary,
        }
    }

    pub fn with_file_tree(mut self, files: Arc<dyn FileTree>) -> Self {
        self.files = files;
        self
    }

    pub async fn run(mut self) -> RestoreOutcome {
        let clock = Instant::now();
        self.progress.info("=== Database Restore Started ===");
        self.progress
            .info(format!("Archive: {}", self.archive_path.display()));
        self.progress
            .info(format!("Target database: {}", self.connector.database_name()));

        let result = self.drive().await;
        self.release_store().await;

        match result {
            Ok(()) => {
                self.summary.duration_ms = clock.elapsed().as_millis() as u64;
                let clean = self.summary.is_clean();
                let message = if clean {
                    "Restore completed successfully".to_owned()
                } else {
                    format!(
                        "Restore completed with errors: {} collection(s) and {} upload directory(ies) failed",
                        self.summary.failed_collections.len(),
                        self.summary.failed_dirs.len()
                    )
                };
                if clean {
                    self.progress.info(format!("=== {message} ==="));
                } else {
                    self.progress.warn(format!("=== {message} ==="));
                }
                let Self {
                    progress,
                    history,
                    summary,
                    ..
                } = self;
                progress.complete(clean, message, Some(RunSummary::Restore(summary.clone())));
                RestoreOutcome {
                    success: clean,
                    summary: Some(summary),
                    error: None,
                    states: history,
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.progress.error(format!("Restore failed: {message}"));
                self.remove_temp_dir().await;
                self.enter(RestoreState::Failed);
                let Self {
                    progress, history, ..
                } = self;
                progress.complete(false, format!("Restore failed: {message}"), None);
                RestoreOutcome {
                    success: false,
                    summary: None,
                    error: Some(message),
                    states: history,
                }
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            let next = match self.state {
                RestoreState::Initializing => {
                    self.initialize().await?;
                    RestoreState::Extracting
                }
                RestoreState::Extracting => {
                    self.extract().await?;
                    RestoreState::ValidatingManifest
                }
                RestoreState::ValidatingManifest => {
                    self.validate_manifest()?;
                    RestoreState::RestoringCollections
                }
                RestoreState::RestoringCollections => {
                    self.restore_collections().await?;
                    RestoreState::RestoringFiles
                }
                RestoreState::RestoringFiles => {
                    self.restore_files().await?;
                    RestoreState::CleaningUp
                }
                RestoreState::CleaningUp => {
                    self.progress.info("Cleaning up temporary files...");
                    self.remove_temp_dir().await;
                    RestoreState::Succeeded
                }
                RestoreState::Succeeded | RestoreState::Failed => return Ok(()),
            };
            self.enter(next);
        }
    }

    fn enter(&mut self, next: RestoreState) {
        info!(run_id = %self.run_id, from = ?self.state, to = ?next, "restore state change");
        self.state = next;
        self.history.push(next);
    }

    async fn initialize(&mut self) -> Result<()> {
        if let Some(dir) = self.config.upload_dirs.iter().find(|d| !is_contained(d)) {
            return Err(EngineError::UnsafeName {
                kind: "upload directory",
                name: dir.clone(),
            });
        }
        if !self.archive_path.is_file() {
            return Err(EngineError::InvalidArchive(format!(
                "{} does not exist",
                self.archive_path.display()
            )));
        }
        fs::create_dir_all(&self.temp_dir)
            .map_err(EngineError::io("create extraction directory", &self.temp_dir))?;

        self.progress.info("Connecting to target document store...");
        match self.connector.connect().await {
            Ok(store) => {
                self.store = Some(store);
                self.progress.info("Connected to target document store");
                Ok(())
            }
            Err(e) => Err(EngineError::Connect {
                target: self.connector.describe(),
                message: format!("{e:#}"),
            }),
        }
    }

    async fn extract(&mut self) -> Result<()> {
        self.progress.info("Extracting backup archive...");
        let archive_path = self.archive_path.clone();
        let temp_dir = self.temp_dir.clone();
        let count = run_blocking(move || archive::extract(&archive_path, &temp_dir)).await?;
        self.progress
            .info(format!("Backup extracted successfully ({count} files)"));
        Ok(())
    }

    fn validate_manifest(&mut self) -> Result<()> {
        self.progress.info("Validating backup contents...");
        let root = locate_content_root(&self.temp_dir)?;
        let manifest_path = root.join(MANIFEST_FILE);
        let raw =
            fs::read(&manifest_path).map_err(EngineError::io("read manifest", &manifest_path))?;
        let manifest: BackupManifest = serde_json::from_slice(&raw)
            .map_err(|e| EngineError::InvalidArchive(format!("unreadable {MANIFEST_FILE}: {e}")))?;

        self.progress
            .info(format!("Backup created: {}", manifest.created.to_rfc3339()));
        self.progress
            .info(format!("Source database: {}", manifest.db_name));
        self.progress.info(format!(
            "Collections: {}",
            manifest.collections.join(", ")
        ));
        if manifest.version != ARCHIVE_FORMAT_VERSION {
            self.progress.warn(format!(
                "Archive format version {} differs from {ARCHIVE_FORMAT_VERSION}",
                manifest.version
            ));
        }
        if !root.join(DATABASE_DIR).is_dir() {
            self.progress
                .warn("Database directory not found in backup, no collections will be restored");
        }

        self.content_root = root;
        self.manifest = Some(manifest);
        Ok(())
    }

    async fn restore_collections(&mut self) -> Result<()> {
        self.progress.info("Restoring collections...");
        let store = self
            .store
            .as_deref()
            .ok_or_else(|| EngineError::Store("store handle not acquired".into()))?;
        let collections = self
            .manifest
            .as_ref()
            .map(|m| m.collections.clone())
            .unwrap_or_default();
        let database_dir = self.content_root.join(DATABASE_DIR);

        for name in collections {
            let path = match snapshot_file(&database_dir, &name) {
                Ok(path) => path,
                Err(e) => {
                    let error = e.to_string();
                    self.progress
                        .error(format!("✗ Refusing to restore {name:?}: {error}"));
                    self.summary
                        .failed_collections
                        .push(UnitFailure { name, error });
                    continue;
                }
            };
            if !path.is_file() {
                self.progress
                    .warn(format!("Backup file for {name} not found, skipping"));
                self.summary.skipped_collections.push(name);
                continue;
            }
            let snapshot = match read_snapshot(&path) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.progress
                        .warn(format!("Backup file for {name} is unreadable, skipping: {e}"));
                    self.summary.skipped_collections.push(name);
                    continue;
                }
            };
            if let Some(err) = &snapshot.error {
                self.progress.warn(format!(
                    "Collection {name} failed at backup time ({err}), skipping"
                ));
                self.summary.skipped_collections.push(name);
                continue;
            }

            self.progress.info(format!(
                "Restoring collection: {name} ({} documents)",
                snapshot.documents.len()
            ));
            match store.replace_all(&name, &snapshot.documents).await {
                Ok(()) => {
                    self.progress.info(format!(
                        "✓ Restored {} documents to {name}",
                        snapshot.documents.len()
                    ));
                    self.summary.total_documents += snapshot.documents.len();
                    self.summary.restored_collections.push(name);
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    self.progress
                        .error(format!("✗ Failed to restore {name}: {error}"));
                    self.summary
                        .failed_collections
                        .push(UnitFailure { name, error });
                }
            }
        }
        self.progress.info(format!(
            "Collections restored: {}, skipped: {}, failed: {}",
            self.summary.restored_collections.len(),
            self.summary.skipped_collections.len(),
            self.summary.failed_collections.len()
        ));
        Ok(())
    }

    async fn restore_files(&mut self) -> Result<()> {
        self.progress.info("Restoring upload files...");
        for dir in self.restore_targets() {
            let src = self.content_root.join(&dir);
            let target = self.config.upload_root.join(&dir);
            if !self.files.exists(&src) {
                self.progress
                    .info(format!("No archived files for {dir}, skipping"));
                continue;
            }

            let safety = if self.files.exists(&target) {
                let safety = self.pre_restore_dir.join(&dir);
                self.copy_aside(&dir, &target, &safety).await?;
                Some(safety)
            } else {
                None
            };

            let files = self.files.clone();
            let (task_src, task_target) = (src.clone(), target.clone());
            let swap = run_blocking(move || {
                Ok(swap_in(
                    files.as_ref(),
                    &task_src,
                    &task_target,
                    safety.as_deref(),
                ))
            })
            .await?;

            match swap {
                Swap::Copied(count) => {
                    self.progress
                        .info(format!("✓ Restored {count} files to {dir}"));
                    self.summary.upload_files += count as usize;
                    self.summary.restored_dirs.push(dir);
                }
                Swap::RolledBack(e) => {
                    self.progress.error(format!(
                        "✗ Failed to restore {dir}: {e}; previous contents put back"
                    ));
                    self.summary.failed_dirs.push(DirectoryFailure {
                        dir,
                        error: e.to_string(),
                    });
                }
                Swap::Unrecovered(e, rollback) => {
                    self.progress.error(format!(
                        "✗ Failed to restore {dir}: {e}; putting previous contents back also failed: {rollback}"
                    ));
                    self.summary.failed_dirs.push(DirectoryFailure {
                        dir,
                        error: format!("{e}; rollback: {rollback}"),
                    });
                }
            }
        }

        self.settle_pre_restore_copy().await;
        self.progress.info(format!(
            "Total files restored: {}",
            self.summary.upload_files
        ));
        Ok(())
    }

    /// Configured upload directories that the archive also lists. Paths from
    /// the manifest are never joined onto the upload root themselves.
    fn restore_targets(&mut self) -> Vec<String> {
        let archived: Vec<String> = self
            .manifest
            .as_ref()
            .map(|m| {
                m.upload_dirs
                    .iter()
                    .map(|d| d.trim_matches('/').to_owned())
                    .collect()
            })
            .unwrap_or_default();
        if archived.is_empty() {
            return outermost_dirs(&self.config.upload_dirs);
        }

        let configured: Vec<String> = self
            .config
            .upload_dirs
            .iter()
            .map(|d| d.trim_matches('/').to_owned())
            .collect();
        for dir in archived.iter().filter(|d| !configured.contains(d)) {
            self.progress.warn(format!(
                "Archived upload directory {dir:?} is not configured for restore, ignoring"
            ));
        }
        let selected: Vec<String> = configured
            .into_iter()
            .filter(|d| archived.contains(d))
            .collect();
        outermost_dirs(&selected)
    }

    /// Drop the pre-restore copy once every directory went in cleanly; keep
    /// it when a directory failed.
    async fn settle_pre_restore_copy(&mut self) {
        let Some(copy) = self.summary.pre_restore_dir.clone() else {
            return;
        };
        if !self.summary.failed_dirs.is_empty() {
            self.progress
                .info(format!("Previous upload files kept in {}", copy.display()));
            return;
        }
        let files = self.files.clone();
        let task_copy = copy.clone();
        let removed = run_blocking(move || {
            files
                .remove_tree(&task_copy)
                .map_err(EngineError::io("remove pre-restore copy", &task_copy))
        })
        .await;
        match removed {
            Ok(()) => {
                self.progress.info("Removed pre-restore copy of upload files");
                self.summary.pre_restore_dir = None;
            }
            Err(e) => self
                .progress
                .warn(format!("Failed to remove pre-restore copy: {e}")),
        }
    }

    /// Copy the live directory to the pre-restore location. Failure here is
    /// fatal: nothing has been overwritten yet.
    async fn copy_aside(&mut self, dir: &str, target: &Path, safety: &Path) -> Result<()> {
        let files = self.files.clone();
        let (task_target, task_safety) = (target.to_path_buf(), safety.to_path_buf());
        let copied = run_blocking(move || {
            files
                .copy_tree(&task_target, &task_safety)
                .map_err(EngineError::io("copy existing files aside", &task_target))
        })
        .await;
        match copied {
            Ok(count) => {
                self.progress.info(format!(
                    "Backed up {count} existing files from {dir} before restore"
                ));
                self.summary.pre_restore_dir = Some(self.pre_restore_dir.clone());
                Ok(())
            }
            Err(e) => {
                self.progress
                    .error(format!("Could not back up existing files in {dir}: {e}"));
                Err(e)
            }
        }
    }

    async fn remove_temp_dir(&mut self) {
        let files = self.files.clone();
        let temp_dir = self.temp_dir.clone();
        let removed = run_blocking(move || {
            files
                .remove_tree(&temp_dir)
                .map_err(EngineError::io("remove extraction directory", &temp_dir))
        })
        .await;
        match removed {
            Ok(()) => info!(run_id = %self.run_id, path = %self.temp_dir.display(), "removed restore directory"),
            Err(e) => self
                .progress
                .warn(format!("Failed to remove temporary directory: {e}")),
        }
    }

    async fn release_store(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        if let Err(e) = store.close().await {
            warn!(run_id = %self.run_id, error = %e, "failed to close document store");
            self.progress
                .warn(format!("Failed to close document store connection: {e:#}"));
        }
    }
}

/// Replace `target` with the archived `src`, putting `safety` back if the
/// copy fails part way.
fn swap_in(files: &dyn FileTree, src: &Path, target: &Path, safety: Option<&Path>) -> Swap {
    let attempt = files
        .remove_tree(target)
        .and_then(|()| files.copy_tree(src, target));
    let err = match attempt {
        Ok(count) => return Swap::Copied(count),
        Err(e) => e,
    };
    let Some(safety) = safety else {
        return Swap::RolledBack(err);
    };
    let rollback = files
        .remove_tree(target)
        .and_then(|()| files.copy_tree(safety, target));
    match rollback {
        Ok(_) => Swap::RolledBack(err),
        Err(rollback) => Swap::Unrecovered(err, rollback),
    }
}

/// The directory holding `backup-info.json`: the extraction root, or its
/// only subdirectory for archives built around a top-level folder.
fn locate_content_root(extracted: &Path) -> Result<PathBuf> {
    if extracted.join(MANIFEST_FILE).is_file() {
        return Ok(extracted.to_path_buf());
    }
    let mut dirs = Vec::new();
    for entry in
        fs::read_dir(extracted).map_err(EngineError::io("read extraction directory", extracted))?
    {
        let entry = entry.map_err(EngineError::io("read extraction directory", extracted))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    match dirs.as_slice() {
        [only] if only.join(MANIFEST_FILE).is_file() => Ok(only.clone()),
        _ => Err(EngineError::InvalidArchive(format!(
            "{MANIFEST_FILE} not found in backup"
        ))),
    }
}
