pub mod archive;
pub mod backup;
pub mod catalog;
mod error;
pub mod exporter;
pub mod files;
pub mod progress;
pub mod provision;
pub mod restore;

pub use backup::{run_backup, BackupConfig, BackupOrchestrator, BackupOutcome, BackupState};
pub use catalog::{ArchiveCatalog, ArchiveInfo, CatalogError};
pub use error::EngineError;
pub use files::{FileTree, LocalFileTree};
pub use progress::{channel, ProgressSink, ProgressStream};
pub use provision::{create_database_from_backup, ProvisionError, ProvisionedDatabase};
pub use restore::{run_restore, RestoreConfig, RestoreOrchestrator, RestoreOutcome, RestoreState};

/// Run blocking filesystem work off the async executor.
pub(crate) async fn run_blocking<T, F>(work: F) -> error::Result<T>
where
    F: FnOnce() -> error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}
