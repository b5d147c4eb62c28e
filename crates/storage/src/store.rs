use std::path::PathBuf;

use anyhow::{bail, Result};
use collection_vault_core::Document;

use crate::postgres_store::PostgresDocumentStore;
use crate::sqlite_store::SqliteDocumentStore;

/// Document-store handle consumed by the backup and restore engine,
/// implemented by both SQLite and Postgres backends.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of every collection known to the store, including empty ones.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Every document of one collection. An unknown collection is empty.
    async fn read_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Replace the full contents of a collection in one transaction.
    async fn replace_all(&self, collection: &str, documents: &[Document]) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}

/// Acquires a fresh store handle for one orchestration run.
#[async_trait::async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DocumentStore>>;

    /// Logical database name recorded in backup manifests.
    fn database_name(&self) -> String;

    /// Connection target with credentials masked, safe for logs.
    fn describe(&self) -> String;
}

/// Connector for a connection string, dispatching on its scheme.
#[derive(Debug, Clone)]
pub struct UriConnector {
    uri: String,
}

impl UriConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait::async_trait]
impl StoreConnector for UriConnector {
    async fn connect(&self) -> Result<Box<dyn DocumentStore>> {
        connect(&self.uri).await
    }

    fn database_name(&self) -> String {
        database_name(&self.uri)
    }

    fn describe(&self) -> String {
        redact_uri(&self.uri)
    }
}

/// Open a store for `sqlite:<path>`, `sqlite://<path>`, `postgres://…` or
/// `postgresql://…` connection strings.
pub async fn connect(uri: &str) -> Result<Box<dyn DocumentStore>> {
    if let Some(path) = sqlite_path(uri) {
        let store = SqliteDocumentStore::open(path).await?;
        return Ok(Box::new(store));
    }
    if is_postgres(uri) {
        let store = PostgresDocumentStore::connect(uri).await?;
        return Ok(Box::new(store));
    }
    bail!(
        "unsupported connection string scheme: {}",
        redact_uri(uri)
    )
}

/// Check that a connection string is reachable without creating files,
/// tables or anything else on the target.
pub async fn ping(uri: &str) -> Result<()> {
    if let Some(path) = sqlite_path(uri) {
        return SqliteDocumentStore::ping(path).await;
    }
    if is_postgres(uri) {
        return PostgresDocumentStore::ping(uri).await;
    }
    bail!(
        "unsupported connection string scheme: {}",
        redact_uri(uri)
    )
}

fn is_postgres(uri: &str) -> bool {
    uri.starts_with("postgres://") || uri.starts_with("postgresql://")
}

fn sqlite_path(uri: &str) -> Option<PathBuf> {
    let rest = uri
        .strip_prefix("sqlite://")
        .or_else(|| uri.strip_prefix("sqlite:"))?;
    let rest = rest.split('?').next().unwrap_or(rest);
    if rest.is_empty() {
        return None;
    }
    Some(PathBuf::from(rest))
}

/// Last path segment of a connection string, without query or file
/// extension; falls back to `collection-vault`.
pub fn database_name(uri: &str) -> String {
    let without_query = uri.split('?').next().unwrap_or(uri);
    let segment = without_query
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .rsplit(':')
        .next()
        .unwrap_or_default();
    let name = segment
        .strip_suffix(".db")
        .or_else(|| segment.strip_suffix(".sqlite"))
        .unwrap_or(segment);
    if name.is_empty() {
        "collection-vault".to_owned()
    } else {
        name.to_owned()
    }
}

/// Mask `user:password@` credentials in a connection string.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_owned();
    };
    let authority_start = scheme_end + 3;
    let authority_end = uri[authority_start..]
        .find('/')
        .map(|i| authority_start + i)
        .unwrap_or(uri.len());
    match uri[authority_start..authority_end].rfind('@') {
        Some(at) => format!(
            "{}***:***{}",
            &uri[..authority_start],
            &uri[authority_start + at..]
        ),
        None => uri.to_owned(),
    }
}
