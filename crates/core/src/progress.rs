use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::manifest::BackupStats;

/// One entry of an orchestrator's progress stream. Every run ends with
/// exactly one `Complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        message: String,
    },
    Error {
        message: String,
    },
    Complete {
        success: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<RunSummary>,
    },
}

impl ProgressEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Progress { message } | Self::Error { message } | Self::Complete { message, .. } => {
                message
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RunSummary {
    Backup(BackupSummary),
    Restore(RestoreSummary),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub archive_path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub stats: BackupStats,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryFailure {
    pub dir: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub archive: String,
    pub restored_collections: Vec<String>,
    pub skipped_collections: Vec<String>,
    pub failed_collections: Vec<UnitFailure>,
    pub total_documents: usize,
    pub restored_dirs: Vec<String>,
    pub failed_dirs: Vec<DirectoryFailure>,
    pub upload_files: usize,
    pub pre_restore_dir: Option<PathBuf>,
    pub duration_ms: u64,
}

impl RestoreSummary {
    /// True when no collection or upload directory failed. Skipped units
    /// (missing or errored snapshots) do not count as failures.
    pub fn is_clean(&self) -> bool {
        self.failed_collections.is_empty() && self.failed_dirs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = ProgressEvent::Progress {
            message: "Exporting collection: editions".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["message"], "Exporting collection: editions");

        let done = ProgressEvent::Complete {
            success: false,
            message: "Backup failed".into(),
            stats: None,
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["success"], false);
        assert!(json.get("stats").is_none());
    }

    #[test]
    fn restore_summary_with_failed_dir_is_not_clean() {
        let mut summary = RestoreSummary::default();
        summary.skipped_collections.push("customviews".into());
        assert!(summary.is_clean());
        summary.failed_dirs.push(DirectoryFailure {
            dir: "uploads".into(),
            error: "disk full".into(),
        });
        assert!(!summary.is_clean());
    }
}
