pub mod manifest;
pub mod naming;
pub mod progress;
pub mod registry;
pub mod snapshot;

pub use manifest::{BackupManifest, BackupStats, ARCHIVE_FORMAT_VERSION};
pub use naming::{archive_file_name, archive_timestamp, is_archive_file_name};
pub use progress::{
    BackupSummary, DirectoryFailure, ProgressEvent, RestoreSummary, RunSummary, UnitFailure,
};
pub use registry::{DatabaseEntry, NewDatabaseEntry, RegistryState, PRIMARY_DATABASE_ID};
pub use snapshot::{CollectionSnapshot, Document};
