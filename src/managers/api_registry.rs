use crate::constants::registry::DEFAULT_VALIDATE_PATH;
use crate::errors::{BrokerError, ToolError};
use crate::models::{ApiStatus, AuthFlavor, Connection, ConnectionSpec, EntryFilter, RegistryEntry};
use crate::services::api_registry::{ApiRegistry, EntryPatch, NewEntry};
use crate::services::call_executor::{CallExecutor, CallRequest, HttpResult};
use crate::services::connection_registry::{ConnectionRegistry, NameLock, StoredConnection};
use crate::services::logger::Logger;
use crate::services::tool_executor::{CallContext, ToolHandler};
use crate::services::validation::Validation;
use crate::utils::tool_errors::unknown_action_error;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const API_ACTIONS: &[&str] = &[
    "register_api",
    "lookup_api",
    "list_apis",
    "call_api",
    "update_api",
    "delete_api",
    "list_connections",
    "test_connection",
];

/// The one implementation of the registry tool set. Both the direct and the
/// protocol path reach it through [`ApiTool`] handlers that share one
/// instance.
pub struct ApiRegistryManager {
    logger: Logger,
    validation: Validation,
    connections: Arc<ConnectionRegistry>,
    apis: Arc<ApiRegistry>,
    executor: Arc<CallExecutor>,
}

impl ApiRegistryManager {
    pub fn new(
        logger: Logger,
        validation: Validation,
        connections: Arc<ConnectionRegistry>,
        apis: Arc<ApiRegistry>,
        executor: Arc<CallExecutor>,
    ) -> Self {
        Self {
            logger: logger.child("api_registry"),
            validation,
            connections,
            apis,
            executor,
        }
    }

    pub async fn handle_action(
        &self,
        action: &str,
        args: Value,
        ctx: &CallContext,
    ) -> Result<Value, ToolError> {
        match action {
            "register_api" => self.register_api(&args, ctx).await,
            "lookup_api" => self.lookup_api(&args).await,
            "list_apis" => self.list_apis(&args).await,
            "call_api" => self.call_api(&args).await,
            "update_api" => self.update_api(&args).await,
            "delete_api" => self.delete_api(&args).await,
            "list_connections" => self.list_connections().await,
            "test_connection" => self.test_connection(&args).await,
            _ => Err(unknown_action_error("api_registry", action, API_ACTIONS)),
        }
    }

    async fn register_api(&self, args: &Value, ctx: &CallContext) -> Result<Value, ToolError> {
        let v = &self.validation;
        let api_name = v.ensure_identifier(
            &v.ensure_string(args.get("api_name").unwrap_or(&Value::Null), "api_name")?,
            "api_name",
        )?;
        let host = v.ensure_string(args.get("host").unwrap_or(&Value::Null), "host")?;
        let auth_flavor = match v.ensure_optional_string(args.get("auth_flavor"), "auth_flavor")? {
            Some(raw) => raw.parse::<AuthFlavor>()?,
            None => AuthFlavor::None,
        };
        let mut spec = ConnectionSpec::new(api_name.clone(), host, auth_flavor);
        spec.base_path = v.ensure_optional_string(args.get("base_path"), "base_path")?;
        spec.secret_scope = v.ensure_optional_string(args.get("secret_scope"), "secret_scope")?;
        spec.api_key_param = v.ensure_optional_string(args.get("api_key_param"), "api_key_param")?;

        let replace = v.ensure_bool(args.get("replace"), "replace", false)?;
        let validate = v.ensure_bool(args.get("validate"), "validate", false)?;
        let validate_path = v
            .ensure_optional_string(args.get("validate_path"), "validate_path")?
            .unwrap_or_else(|| DEFAULT_VALIDATE_PATH.to_string());
        let requested_by = v
            .ensure_optional_string(args.get("requested_by"), "requested_by")?
            .or_else(|| ctx.requested_by.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let new_entry = NewEntry {
            api_name: api_name.clone(),
            description: v.ensure_optional_string(args.get("description"), "description")?,
            connection_name: api_name.clone(),
            documentation_url: v
                .ensure_optional_string(args.get("documentation_url"), "documentation_url")?,
            available_endpoints: v
                .ensure_string_list(args.get("available_endpoints"), "available_endpoints")?,
            example_calls: args
                .get("example_calls")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
            requested_by,
        };

        let lock = self.connections.lock_name(&api_name).await;
        let existing = self.apis.find_by_name(&api_name).await?;
        if existing.is_some() && !replace {
            return Err(BrokerError::duplicate("api", &api_name).into());
        }

        let (previous, connection) = if replace {
            let previous = self.connections.snapshot_locked(&lock).await?;
            let connection = self
                .connections
                .replace_locked(&lock, spec, &ctx.credentials)
                .await?;
            (previous, connection)
        } else {
            let connection = self
                .connections
                .create_locked(&lock, spec, &ctx.credentials)
                .await?;
            (None, connection)
        };

        let stored = match &existing {
            Some(current) => self.apis.refresh(current, new_entry).await,
            None => self.apis.create(new_entry).await,
        };
        let mut entry = match stored {
            Ok(entry) => entry,
            Err(err) => {
                self.rollback_connection(&lock, previous.as_ref()).await;
                return Err(err.into());
            }
        };

        if validate {
            entry = self.validate_entry(&entry, &connection, &validate_path).await?;
        }

        self.logger.info(
            "api registered",
            Some(&serde_json::json!({
                "api_id": entry.api_id,
                "api_name": entry.api_name,
                "auth_flavor": connection.auth_flavor,
                "replaced": existing.is_some(),
                "status": entry.status.as_str(),
            })),
        );
        Ok(entry_view(&entry, Some(&connection)))
    }

    /// Puts the name back the way it was before the registration started.
    async fn rollback_connection(&self, lock: &NameLock, previous: Option<&StoredConnection>) {
        let outcome = match previous {
            Some(previous) => self.connections.restore_locked(lock, previous).await,
            None => self.connections.drop_locked(lock).await.map(|_| ()),
        };
        if let Err(err) = outcome {
            self.logger.error(
                "failed to roll back connection after registration failure",
                Some(&serde_json::json!({
                    "name": lock.name(),
                    "error": err.to_string(),
                })),
            );
        }
    }

    /// One validation call; the outcome is recorded on the entry and never undoes
    /// the registration.
    async fn validate_entry(
        &self,
        entry: &RegistryEntry,
        connection: &Connection,
        path: &str,
    ) -> Result<RegistryEntry, ToolError> {
        let (status, message) = match self
            .executor
            .execute_with(connection, CallRequest::get(path))
            .await
        {
            Ok(result) if result.success => (
                ApiStatus::Valid,
                format!("Validated: HTTP {} from {}", result.status, result.effective_url),
            ),
            Ok(result) => (
                ApiStatus::Error,
                format!("HTTP {} from {}", result.status, result.effective_url),
            ),
            Err(err) => (ApiStatus::Error, err.to_string()),
        };
        Ok(self.apis.set_status(entry, status, Some(message)).await?)
    }

    /// Accepts `api_name` or `api_id`.
    async fn resolve_entry(&self, args: &Value) -> Result<RegistryEntry, ToolError> {
        let v = &self.validation;
        if let Some(api_id) = v.ensure_optional_string(args.get("api_id"), "api_id")? {
            return Ok(self.apis.get_by_id(&api_id).await?);
        }
        match v.ensure_optional_string(args.get("api_name"), "api_name")? {
            Some(api_name) => Ok(self.apis.get_by_name(&api_name).await?),
            None => Err(ToolError::invalid_params("api_name or api_id is required")),
        }
    }

    /// Reads stay lock-free. A missing connection may only mean a replace is
    /// in flight, so the pair is read again under the name's lock before a
    /// dangling reference is reported. It is never repaired here.
    async fn resolve_connection(
        &self,
        entry: RegistryEntry,
    ) -> Result<(RegistryEntry, Connection), ToolError> {
        match self.connections.resolve(&entry.connection_name).await {
            Ok(connection) => return Ok((entry, connection)),
            Err(BrokerError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        let _lock = self.connections.lock_name(&entry.connection_name).await;
        let entry = self.apis.get_by_id(&entry.api_id).await?;
        match self.connections.resolve(&entry.connection_name).await {
            Ok(connection) => Ok((entry, connection)),
            Err(BrokerError::NotFound { .. }) => Err(BrokerError::InconsistentReference {
                api_name: entry.api_name.clone(),
                connection_name: entry.connection_name.clone(),
            }
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    async fn lookup_api(&self, args: &Value) -> Result<Value, ToolError> {
        let entry = self.resolve_entry(args).await?;
        let (entry, connection) = self.resolve_connection(entry).await?;
        Ok(entry_view(&entry, Some(&connection)))
    }

    async fn list_apis(&self, args: &Value) -> Result<Value, ToolError> {
        let v = &self.validation;
        let filter = EntryFilter {
            status: match v.ensure_optional_string(args.get("status"), "status")? {
                Some(raw) => Some(raw.parse::<ApiStatus>()?),
                None => None,
            },
            connection_name: v.ensure_optional_string(args.get("connection_name"), "connection_name")?,
        };
        let entries = self.apis.list(&filter).await?;
        let items: Vec<Value> = entries.iter().map(|entry| entry_view(entry, None)).collect();
        Ok(serde_json::json!({
            "apis": items,
            "count": items.len(),
        }))
    }

    fn call_request(&self, args: &Value, default_path: Option<&str>) -> Result<CallRequest, ToolError> {
        let v = &self.validation;
        let path = match v.ensure_optional_string(args.get("path"), "path")? {
            Some(path) => path,
            None => match default_path {
                Some(path) => path.to_string(),
                None => return Err(ToolError::invalid_params("path must be a non-empty string")),
            },
        };
        Ok(CallRequest {
            path,
            method: v.ensure_optional_string(args.get("method"), "method")?,
            params: v.ensure_string_map(args.get("params"), "params")?,
            headers: v.ensure_string_map(args.get("headers"), "headers")?,
            body: args.get("body").filter(|b| !b.is_null()).cloned(),
            timeout_ms: Some(
                v.ensure_timeout_ms(args.get("timeout_ms"), self.executor.default_timeout_ms())?,
            ),
        })
    }

    /// Resolve and call in one operation, so every call runs against the
    /// connection as stored right now.
    async fn call_api(&self, args: &Value) -> Result<Value, ToolError> {
        let request = self.call_request(args, None)?;
        let entry = self.resolve_entry(args).await?;
        let (entry, connection) = self.resolve_connection(entry).await?;
        let result = self.executor.execute_with(&connection, request).await?;
        Ok(result_view(&entry.api_name, result))
    }

    /// Metadata only; the connection and its credential are not touched.
    async fn update_api(&self, args: &Value) -> Result<Value, ToolError> {
        let v = &self.validation;
        let patch = EntryPatch {
            description: v.ensure_optional_string(args.get("description"), "description")?,
            documentation_url: v
                .ensure_optional_string(args.get("documentation_url"), "documentation_url")?,
            available_endpoints: match args.get("available_endpoints") {
                None | Some(Value::Null) => None,
                value => Some(v.ensure_string_list(value, "available_endpoints")?),
            },
            example_calls: args.get("example_calls").and_then(|v| v.as_array()).cloned(),
        };
        if patch.is_empty() {
            return Err(ToolError::invalid_params(
                "nothing to update: pass description, documentation_url, available_endpoints or example_calls",
            ));
        }
        let located = self.resolve_entry(args).await?;
        let _lock = self.connections.lock_name(&located.connection_name).await;
        let entry = self.apis.get_by_id(&located.api_id).await?;
        let updated = self.apis.update_metadata(&entry, patch).await?;
        Ok(entry_view(&updated, None))
    }

    async fn delete_api(&self, args: &Value) -> Result<Value, ToolError> {
        let drop_connection =
            self.validation
                .ensure_bool(args.get("drop_connection"), "drop_connection", true)?;
        let located = self.resolve_entry(args).await?;
        let lock = self.connections.lock_name(&located.connection_name).await;
        // Re-read under the lock; a concurrent delete may have won.
        let Some(entry) = self.apis.find_by_name(&located.api_name).await? else {
            return Err(BrokerError::not_found("api", &located.api_name).into());
        };
        self.apis.delete(&entry.api_id).await?;

        let mut connection_dropped = false;
        let mut retained_for = Vec::new();
        if drop_connection {
            match self.connections.drop_locked(&lock).await {
                Ok(dropped) => connection_dropped = dropped,
                Err(BrokerError::ConnectionInUse { api_ids, .. }) => retained_for = api_ids,
                Err(err) => return Err(err.into()),
            }
        }
        self.logger.info(
            "api deleted",
            Some(&serde_json::json!({
                "api_id": entry.api_id,
                "api_name": entry.api_name,
                "connection_dropped": connection_dropped,
            })),
        );
        Ok(serde_json::json!({
            "deleted": true,
            "api_id": entry.api_id,
            "api_name": entry.api_name,
            "connection_name": entry.connection_name,
            "connection_dropped": connection_dropped,
            "connection_retained_for": retained_for,
        }))
    }

    async fn list_connections(&self) -> Result<Value, ToolError> {
        let connections = self.connections.list().await?;
        let entries = self.apis.list(&EntryFilter::default()).await?;
        let mut referenced: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for entry in &entries {
            referenced
                .entry(entry.connection_name.as_str())
                .or_default()
                .push(entry.api_name.as_str());
        }
        let items: Vec<Value> = connections
            .iter()
            .map(|connection| {
                let mut view = connection_view(connection);
                if let Value::Object(map) = &mut view {
                    map.insert(
                        "referenced_by".to_string(),
                        serde_json::json!(referenced.get(connection.name.as_str()).cloned().unwrap_or_default()),
                    );
                }
                view
            })
            .collect();
        Ok(serde_json::json!({
            "connections": items,
            "count": items.len(),
        }))
    }

    async fn test_connection(&self, args: &Value) -> Result<Value, ToolError> {
        let name = self.validation.ensure_string(
            args.get("connection_name").unwrap_or(&Value::Null),
            "connection_name",
        )?;
        let request = self.call_request(args, Some(DEFAULT_VALIDATE_PATH))?;
        let connection = self.connections.resolve(&name).await?;
        let result = self.executor.execute_with(&connection, request).await?;
        Ok(serde_json::json!({
            "connection_name": connection.name,
            "success": result.success,
            "status": result.status,
            "method": result.method,
            "effective_url": result.effective_url,
            "duration_ms": result.duration_ms,
            "auth_applied": result.auth_applied,
        }))
    }
}

fn connection_view(connection: &Connection) -> Value {
    serde_json::json!({
        "name": connection.name,
        "host": connection.host,
        "base_path": connection.base_path,
        "base_url": connection.base_url(),
        "auth_flavor": connection.auth_flavor,
        "secret_scope": connection.secret_scope,
        "secret_key": connection.secret_key,
        "api_key_param": connection.api_key_param,
        "created_at": connection.created_at.to_rfc3339(),
    })
}

fn entry_view(entry: &RegistryEntry, connection: Option<&Connection>) -> Value {
    let mut view = serde_json::to_value(entry).unwrap_or(Value::Null);
    if let (Value::Object(map), Some(connection)) = (&mut view, connection) {
        map.insert("connection".to_string(), connection_view(connection));
    }
    view
}

fn result_view(api_name: &str, result: HttpResult) -> Value {
    let mut view = serde_json::to_value(result).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut view {
        map.insert("api_name".to_string(), Value::String(api_name.to_string()));
    }
    view
}

/// Binds one tool name to an action on the shared manager.
pub struct ApiTool {
    manager: Arc<ApiRegistryManager>,
    action: &'static str,
}

impl ApiTool {
    pub fn new(manager: Arc<ApiRegistryManager>, action: &'static str) -> Self {
        Self { manager, action }
    }
}

#[async_trait]
impl ToolHandler for ApiTool {
    async fn handle(&self, args: Value, ctx: &CallContext) -> Result<Value, ToolError> {
        self.manager.handle_action(self.action, args, ctx).await
    }
}
