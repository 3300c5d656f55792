//! Collaborator interfaces for record storage and the secret vault, plus the
//! implementations shipped with the server.

mod file_secret_store;
mod memory_metadata_store;
mod memory_secret_store;
mod sqlite_metadata_store;

pub use file_secret_store::FileSecretStore;
pub use memory_metadata_store::MemoryMetadataStore;
pub use memory_secret_store::MemorySecretStore;
pub use sqlite_metadata_store::SqliteMetadataStore;

use crate::errors::BrokerResult;
use crate::models::{Connection, EntryFilter, RegistryEntry, SecretValue};
use async_trait::async_trait;

/// Row-oriented storage for connections and registry entries.
///
/// `insert_*` fail with `DuplicateName` when the key is taken; `update_entry`
/// fails with `NotFound` when the row is gone. Deletes report whether a row
/// existed.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_connection(&self, connection: &Connection) -> BrokerResult<()>;
    async fn get_connection(&self, name: &str) -> BrokerResult<Option<Connection>>;
    async fn delete_connection(&self, name: &str) -> BrokerResult<bool>;
    async fn list_connections(&self) -> BrokerResult<Vec<Connection>>;

    async fn insert_entry(&self, entry: &RegistryEntry) -> BrokerResult<()>;
    async fn get_entry(&self, api_id: &str) -> BrokerResult<Option<RegistryEntry>>;
    async fn find_entry_by_name(&self, api_name: &str) -> BrokerResult<Option<RegistryEntry>>;
    async fn update_entry(&self, entry: &RegistryEntry) -> BrokerResult<()>;
    async fn delete_entry(&self, api_id: &str) -> BrokerResult<bool>;
    async fn list_entries(&self, filter: &EntryFilter) -> BrokerResult<Vec<RegistryEntry>>;
}

/// Encrypted key/value vault partitioned by scope.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn put(&self, scope: &str, key: &str, value: &SecretValue) -> BrokerResult<()>;
    /// Fails with `NotFound` (kind `secret`) when nothing is stored.
    async fn get(&self, scope: &str, key: &str) -> BrokerResult<SecretValue>;
    async fn delete(&self, scope: &str, key: &str) -> BrokerResult<bool>;
    async fn list(&self, scope: &str) -> BrokerResult<Vec<String>>;
}
