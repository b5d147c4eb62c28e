use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use collection_vault_core::Document;
use rusqlite::{params, Connection, OpenFlags};

use crate::store::DocumentStore;

/// SQLite-backed document store. Each method opens a fresh connection on a
/// blocking worker.
pub struct SqliteDocumentStore {
    db_path: PathBuf,
}

impl SqliteDocumentStore {
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        let db_path = store.db_path.clone();
        tokio::task::spawn_blocking(move || init_db(&db_path)).await??;
        Ok(store)
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Check that `db_path` is usable without creating or altering it.
    pub async fn ping(db_path: PathBuf) -> Result<()> {
        tokio::task::spawn_blocking(move || ping_db(&db_path)).await?
    }
}

/// An existing file must open read-only as a SQLite database. A missing file
/// only needs its directory, since [`SqliteDocumentStore::open`] creates it.
fn ping_db(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        let dir = match db_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !dir.is_dir() {
            bail!("directory {} does not exist", dir.display());
        }
        return Ok(());
    }
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("open document db {} read-only", db_path.display()))?;
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .with_context(|| format!("query document db {}", db_path.display()))?;
    Ok(())
}

fn open_conn(db_path: &PathBuf) -> Result<Connection> {
    Connection::open(db_path).with_context(|| format!("open document db {}", db_path.display()))
}

fn init_db(db_path: &PathBuf) -> Result<()> {
    let conn = open_conn(db_path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            position INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (collection, position)
        );",
    )?;
    Ok(())
}

#[async_trait::async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(Into::into)
        })
        .await?
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Document>> {
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = open_conn(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT body FROM documents WHERE collection = ?1 ORDER BY position",
            )?;
            let bodies = stmt
                .query_map([&collection], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            bodies
                .iter()
                .map(|raw| {
                    serde_json::from_str::<Document>(raw)
                        .with_context(|| format!("parse document in {collection}"))
                })
                .collect()
        })
        .await?
    }

    async fn replace_all(&self, collection: &str, documents: &[Document]) -> Result<()> {
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        let bodies = documents
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tokio::task::spawn_blocking(move || {
            let mut conn = open_conn(&db_path)?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
                [&collection],
            )?;
            tx.execute("DELETE FROM documents WHERE collection = ?1", [&collection])?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO documents (collection, position, body) VALUES (?1, ?2, ?3)",
                )?;
                for (position, body) in bodies.iter().enumerate() {
                    insert.execute(params![collection, position as i64, body])?;
                }
            }
            tx.commit()
                .with_context(|| format!("commit replacement of {collection}"))?;
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, title: &str) -> Document {
        let mut d = Document::new();
        d.insert("_id".into(), json!(id));
        d.insert("title".into(), json!(title));
        d
    }

    #[tokio::test]
    async fn replace_all_overwrites_previous_contents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SqliteDocumentStore::open(tmp.path().join("docs.db"))
            .await
            .expect("open");

        store
            .replace_all("editions", &[doc("1", "Regular"), doc("2", "Special")])
            .await
            .unwrap();
        store
            .replace_all("editions", &[doc("3", "Bonus")])
            .await
            .unwrap();

        let docs = store.read_all("editions").await.unwrap();
        assert_eq!(docs, vec![doc("3", "Bonus")]);
    }

    #[tokio::test]
    async fn empty_collections_are_listed_and_unknown_ones_read_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SqliteDocumentStore::open(tmp.path().join("docs.db"))
            .await
            .expect("open");

        store.replace_all("franchises", &[]).await.unwrap();
        store.replace_all("editions", &[doc("1", "x")]).await.unwrap();

        assert_eq!(
            store.list_collections().await.unwrap(),
            vec!["editions".to_string(), "franchises".to_string()]
        );
        assert!(store.read_all("factions").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ping_leaves_missing_and_existing_files_unchanged() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let missing = tmp.path().join("new.db");
        SqliteDocumentStore::ping(missing.clone()).await.unwrap();
        assert!(!missing.exists());

        let existing = tmp.path().join("docs.db");
        SqliteDocumentStore::open(existing.clone())
            .await
            .expect("open")
            .replace_all("editions", &[doc("1", "x")])
            .await
            .unwrap();
        let before = std::fs::read(&existing).unwrap();
        SqliteDocumentStore::ping(existing.clone()).await.unwrap();
        assert_eq!(std::fs::read(&existing).unwrap(), before);
    }

    #[tokio::test]
    async fn ping_rejects_non_databases_and_missing_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let text = tmp.path().join("notes.db");
        std::fs::write(&text, "not a database\n".repeat(512)).unwrap();
        assert!(SqliteDocumentStore::ping(text).await.is_err());

        let orphan = tmp.path().join("no-such-dir").join("a.db");
        assert!(SqliteDocumentStore::ping(orphan).await.is_err());
        assert!(!tmp.path().join("no-such-dir").exists());
    }
}
