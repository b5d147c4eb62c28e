use std::fs;
use std::path::{Path, PathBuf};

use collection_vault_core::CollectionSnapshot;
use collection_vault_storage::DocumentStore;

use crate::error::{EngineError, Result};
use crate::files::is_plain_name;

/// Read one collection in full. Read failures never escape: they come back
/// as a snapshot with `count = 0` and the error recorded.
pub async fn export_collection(store: &dyn DocumentStore, collection: &str) -> CollectionSnapshot {
    match store.read_all(collection).await {
        Ok(documents) => CollectionSnapshot::captured(collection, documents),
        Err(e) => CollectionSnapshot::failed(collection, format!("{e:#}")),
    }
}

/// `<database_dir>/<collection>.json`. Names that are not a single plain
/// path component are refused.
pub fn snapshot_file(database_dir: &Path, collection: &str) -> Result<PathBuf> {
    if !is_plain_name(collection) {
        return Err(EngineError::UnsafeName {
            kind: "collection",
            name: collection.to_owned(),
        });
    }
    Ok(database_dir.join(format!("{collection}.json")))
}

pub fn write_snapshot(database_dir: &Path, snapshot: &CollectionSnapshot) -> Result<PathBuf> {
    let path = snapshot_file(database_dir, &snapshot.collection)?;
    let raw = serde_json::to_vec_pretty(snapshot)?;
    fs::write(&path, raw).map_err(EngineError::io("write snapshot", &path))?;
    Ok(path)
}

pub fn read_snapshot(path: &Path) -> Result<CollectionSnapshot> {
    let raw = fs::read(path).map_err(EngineError::io("read snapshot", path))?;
    Ok(serde_json::from_slice(&raw)?)
}
