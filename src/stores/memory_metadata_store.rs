use crate::errors::{BrokerError, BrokerResult};
use crate::models::{Connection, EntryFilter, RegistryEntry};
use crate::stores::MetadataStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Tables {
    connections: HashMap<String, Connection>,
    entries: HashMap<String, RegistryEntry>,
}

#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_connection(&self, connection: &Connection) -> BrokerResult<()> {
        let mut guard = self.tables.write().unwrap_or_else(|err| err.into_inner());
        if guard.connections.contains_key(&connection.name) {
            return Err(BrokerError::duplicate("connection", &connection.name));
        }
        guard
            .connections
            .insert(connection.name.clone(), connection.clone());
        Ok(())
    }

    async fn get_connection(&self, name: &str) -> BrokerResult<Option<Connection>> {
        let guard = self.tables.read().unwrap_or_else(|err| err.into_inner());
        Ok(guard.connections.get(name).cloned())
    }

    async fn delete_connection(&self, name: &str) -> BrokerResult<bool> {
        let mut guard = self.tables.write().unwrap_or_else(|err| err.into_inner());
        Ok(guard.connections.remove(name).is_some())
    }

    async fn list_connections(&self) -> BrokerResult<Vec<Connection>> {
        let guard = self.tables.read().unwrap_or_else(|err| err.into_inner());
        let mut items: Vec<Connection> = guard.connections.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn insert_entry(&self, entry: &RegistryEntry) -> BrokerResult<()> {
        let mut guard = self.tables.write().unwrap_or_else(|err| err.into_inner());
        if guard.entries.contains_key(&entry.api_id) {
            return Err(BrokerError::duplicate("api", &entry.api_id));
        }
        if guard.entries.values().any(|e| e.api_name == entry.api_name) {
            return Err(BrokerError::duplicate("api", &entry.api_name));
        }
        guard.entries.insert(entry.api_id.clone(), entry.clone());
        Ok(())
    }

    async fn get_entry(&self, api_id: &str) -> BrokerResult<Option<RegistryEntry>> {
        let guard = self.tables.read().unwrap_or_else(|err| err.into_inner());
        Ok(guard.entries.get(api_id).cloned())
    }

    async fn find_entry_by_name(&self, api_name: &str) -> BrokerResult<Option<RegistryEntry>> {
        let guard = self.tables.read().unwrap_or_else(|err| err.into_inner());
        Ok(guard
            .entries
            .values()
            .find(|entry| entry.api_name == api_name)
            .cloned())
    }

    async fn update_entry(&self, entry: &RegistryEntry) -> BrokerResult<()> {
        let mut guard = self.tables.write().unwrap_or_else(|err| err.into_inner());
        match guard.entries.get_mut(&entry.api_id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(BrokerError::not_found("api", &entry.api_id)),
        }
    }

    async fn delete_entry(&self, api_id: &str) -> BrokerResult<bool> {
        let mut guard = self.tables.write().unwrap_or_else(|err| err.into_inner());
        Ok(guard.entries.remove(api_id).is_some())
    }

    async fn list_entries(&self, filter: &EntryFilter) -> BrokerResult<Vec<RegistryEntry>> {
        let guard = self.tables.read().unwrap_or_else(|err| err.into_inner());
        let mut items: Vec<RegistryEntry> = guard
            .entries
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.modified_date.cmp(&a.modified_date));
        Ok(items)
    }
}
