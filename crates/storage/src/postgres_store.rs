use anyhow::{Context, Result};
use collection_vault_core::Document;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::store::{redact_uri, DocumentStore};

/// Postgres-backed document store.
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("connect to postgres at {}", redact_uri(database_url)))?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Connect with a single connection and run `SELECT 1`; no tables are
    /// created.
    pub async fn ping(database_url: &str) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .with_context(|| format!("connect to postgres at {}", redact_uri(database_url)))?;
        let queried = sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("query postgres");
        pool.close().await;
        queried.map(|_| ())
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS collections (name TEXT PRIMARY KEY)")
            .execute(&self.pool)
            .await
            .context("create collections table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                position BIGINT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, position)
            )",
        )
        .execute(&self.pool)
        .await
        .context("create documents table")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT body FROM documents WHERE collection = $1 ORDER BY position",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let raw: String = r.get("body");
                serde_json::from_str::<Document>(&raw)
                    .with_context(|| format!("parse document in {collection}"))
            })
            .collect()
    }

    async fn replace_all(&self, collection: &str, documents: &[Document]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO collections (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE collection = $1")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        for (position, doc) in documents.iter().enumerate() {
            sqlx::query("INSERT INTO documents (collection, position, body) VALUES ($1, $2, $3)")
                .bind(collection)
                .bind(position as i64)
                .bind(serde_json::to_string(doc)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit()
            .await
            .with_context(|| format!("commit replacement of {collection}"))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
