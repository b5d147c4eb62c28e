use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version written into every manifest.
pub const ARCHIVE_FORMAT_VERSION: &str = "1.0";

/// Archive-relative locations shared by the backup and restore sides.
pub const MANIFEST_FILE: &str = "backup-info.json";
pub const LOG_FILE: &str = "backup.log";
pub const DATABASE_DIR: &str = "database";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupStats {
    pub total_collections: usize,
    pub successful_collections: usize,
    pub failed_collections: Vec<String>,
    pub total_documents: usize,
    pub upload_files: usize,
}

/// Describes the contents of one backup archive. Written once per run,
/// before compression, as `backup-info.json` at the archive root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub timestamp: String,
    pub created: DateTime<Utc>,
    pub db_name: String,
    pub collections: Vec<String>,
    #[serde(default)]
    pub upload_dirs: Vec<String>,
    #[serde(default)]
    pub stats: BackupStats,
    #[serde(default = "default_backup_type")]
    pub backup_type: String,
    #[serde(default)]
    pub source_uri: String,
    pub version: String,
    #[serde(default)]
    pub tool_version: String,
}

fn default_backup_type() -> String {
    "json-export".to_owned()
}

impl BackupManifest {
    /// Relative path of a collection's snapshot file inside the archive.
    pub fn snapshot_path(collection: &str) -> String {
        format!("{DATABASE_DIR}/{collection}.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_manifest_without_optional_fields() {
        let raw = r#"{
            "timestamp": "2024-05-01T10-00-00",
            "created": "2024-05-01T10:00:00Z",
            "dbName": "ship-collection-v2",
            "collections": ["editions", "franchises"],
            "stats": {"totalDocuments": 3, "uploadFiles": 2},
            "version": "1.0"
        }"#;
        let manifest: BackupManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.collections, vec!["editions", "franchises"]);
        assert_eq!(manifest.stats.total_documents, 3);
        assert_eq!(manifest.backup_type, "json-export");
        assert!(manifest.upload_dirs.is_empty());
    }

    #[test]
    fn snapshot_path_lives_under_database_dir() {
        assert_eq!(
            BackupManifest::snapshot_path("editions"),
            "database/editions.json"
        );
    }
}
