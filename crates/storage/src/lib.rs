pub mod postgres_store;
mod registry;
pub mod sqlite_store;
pub mod store;

pub use registry::{ConnectionTest, DatabaseRegistry, RegistryError};
pub use store::{
    connect, database_name, ping, redact_uri, DocumentStore, StoreConnector, UriConnector,
};
