use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A schema-less stored record. Field structure is never inspected.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Point-in-time contents of one collection, serialized as
/// `database/<collection>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionSnapshot {
    pub collection: String,
    pub timestamp: DateTime<Utc>,
    pub documents: Vec<Document>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectionSnapshot {
    pub fn captured(collection: &str, documents: Vec<Document>) -> Self {
        Self {
            collection: collection.to_owned(),
            timestamp: Utc::now(),
            count: documents.len(),
            documents,
            error: None,
        }
    }

    /// Placeholder written when the export itself failed, so the archive
    /// still accounts for the collection.
    pub fn failed(collection: &str, error: impl Into<String>) -> Self {
        Self {
            collection: collection.to_owned(),
            timestamp: Utc::now(),
            documents: Vec::new(),
            count: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_snapshot_serializes_error_and_zero_count() {
        let snap = CollectionSnapshot::failed("editions", "permission denied");
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["count"], 0);
        assert_eq!(value["error"], "permission denied");
        assert_eq!(value["documents"], json!([]));
    }

    #[test]
    fn captured_snapshot_omits_error_field() {
        let mut doc = Document::new();
        doc.insert("_id".into(), json!("64f0c1"));
        let snap = CollectionSnapshot::captured("franchises", vec![doc]);
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["count"], 1);
        assert!(value.get("error").is_none());
        assert_eq!(value["documents"][0]["_id"], "64f0c1");
    }
}
