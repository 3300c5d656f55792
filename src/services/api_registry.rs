use crate::constants::registry::{API_ID_PREFIX, STATUS_PENDING_MESSAGE};
use crate::errors::{BrokerError, BrokerResult};
use crate::models::{ApiStatus, EntryFilter, RegistryEntry};
use crate::services::logger::Logger;
use crate::stores::MetadataStore;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub api_name: String,
    pub description: Option<String>,
    pub connection_name: String,
    pub documentation_url: Option<String>,
    pub available_endpoints: Vec<String>,
    pub example_calls: Vec<Value>,
    pub requested_by: String,
}

/// Metadata-only edit of an entry. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub description: Option<String>,
    pub documentation_url: Option<String>,
    pub available_endpoints: Option<Vec<String>>,
    pub example_calls: Option<Vec<Value>>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.documentation_url.is_none()
            && self.available_endpoints.is_none()
            && self.example_calls.is_none()
    }
}

/// Registry entry CRUD. Entries carry metadata only; connection and secret
/// handling live in the connection registry.
pub struct ApiRegistry {
    logger: Logger,
    metadata: Arc<dyn MetadataStore>,
}

pub fn new_api_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", API_ID_PREFIX, &raw[..8])
}

impl ApiRegistry {
    pub fn new(logger: Logger, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            logger: logger.child("registry"),
            metadata,
        }
    }

    pub async fn create(&self, new: NewEntry) -> BrokerResult<RegistryEntry> {
        let now = Utc::now();
        let entry = RegistryEntry {
            api_id: new_api_id(),
            api_name: new.api_name,
            description: new.description,
            connection_name: new.connection_name,
            documentation_url: new.documentation_url,
            available_endpoints: new.available_endpoints,
            example_calls: new.example_calls,
            status: ApiStatus::Pending,
            validation_message: Some(STATUS_PENDING_MESSAGE.to_string()),
            created_at: now,
            modified_date: now,
            requested_by: new.requested_by,
        };
        self.metadata.insert_entry(&entry).await?;
        self.logger.info(
            "registry entry created",
            Some(&serde_json::json!({
                "api_id": entry.api_id,
                "api_name": entry.api_name,
                "connection_name": entry.connection_name,
            })),
        );
        Ok(entry)
    }

    pub async fn find_by_name(&self, api_name: &str) -> BrokerResult<Option<RegistryEntry>> {
        self.metadata.find_entry_by_name(api_name).await
    }

    pub async fn get_by_name(&self, api_name: &str) -> BrokerResult<RegistryEntry> {
        self.find_by_name(api_name)
            .await?
            .ok_or_else(|| BrokerError::not_found("api", api_name))
    }

    pub async fn get_by_id(&self, api_id: &str) -> BrokerResult<RegistryEntry> {
        self.metadata
            .get_entry(api_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("api", api_id))
    }

    /// Rewrites the descriptive fields of an existing entry in place, keeping
    /// its id and creation time.
    pub async fn refresh(&self, existing: &RegistryEntry, new: NewEntry) -> BrokerResult<RegistryEntry> {
        let entry = RegistryEntry {
            api_id: existing.api_id.clone(),
            api_name: new.api_name,
            description: new.description,
            connection_name: new.connection_name,
            documentation_url: new.documentation_url,
            available_endpoints: new.available_endpoints,
            example_calls: new.example_calls,
            status: ApiStatus::Pending,
            validation_message: Some(STATUS_PENDING_MESSAGE.to_string()),
            created_at: existing.created_at,
            modified_date: Utc::now(),
            requested_by: new.requested_by,
        };
        self.metadata.update_entry(&entry).await?;
        Ok(entry)
    }

    /// Applies `patch` and bumps `modified_date`. Status, connection and
    /// identity stay as they are.
    pub async fn update_metadata(
        &self,
        existing: &RegistryEntry,
        patch: EntryPatch,
    ) -> BrokerResult<RegistryEntry> {
        let mut updated = existing.clone();
        if let Some(description) = patch.description {
            updated.description = Some(description);
        }
        if let Some(documentation_url) = patch.documentation_url {
            updated.documentation_url = Some(documentation_url);
        }
        if let Some(endpoints) = patch.available_endpoints {
            updated.available_endpoints = endpoints;
        }
        if let Some(examples) = patch.example_calls {
            updated.example_calls = examples;
        }
        updated.modified_date = Utc::now();
        self.metadata.update_entry(&updated).await?;
        self.logger.info(
            "registry entry updated",
            Some(&serde_json::json!({
                "api_id": updated.api_id,
                "api_name": updated.api_name,
            })),
        );
        Ok(updated)
    }

    pub async fn set_status(
        &self,
        entry: &RegistryEntry,
        status: ApiStatus,
        message: Option<String>,
    ) -> BrokerResult<RegistryEntry> {
        let mut updated = entry.clone();
        updated.status = status;
        updated.validation_message = message;
        updated.modified_date = Utc::now();
        self.metadata.update_entry(&updated).await?;
        self.logger.info(
            "registry entry status changed",
            Some(&serde_json::json!({
                "api_id": updated.api_id,
                "status": status.as_str(),
            })),
        );
        Ok(updated)
    }

    pub async fn delete(&self, api_id: &str) -> BrokerResult<bool> {
        self.metadata.delete_entry(api_id).await
    }

    pub async fn list(&self, filter: &EntryFilter) -> BrokerResult<Vec<RegistryEntry>> {
        self.metadata.list_entries(filter).await
    }
}
