use crate::config::{Config, MetadataBackend, SecretBackend};
use crate::errors::ToolError;
use crate::managers::api_registry::{ApiRegistryManager, ApiTool, API_ACTIONS};
use crate::mcp::catalog::tool_catalog;
use crate::services::api_registry::ApiRegistry;
use crate::services::call_executor::{CallExecutor, ExecutorSettings};
use crate::services::connection_registry::ConnectionRegistry;
use crate::services::credential_context::{within, CredentialContext};
use crate::services::http_transport::{HttpTransport, ReqwestTransport};
use crate::services::logger::Logger;
use crate::services::security::Security;
use crate::services::tool_executor::{CallContext, Surface, ToolExecutor, ToolHandler};
use crate::services::validation::Validation;
use crate::stores::{
    FileSecretStore, MemoryMetadataStore, MemorySecretStore, MetadataStore, SecretStore,
    SqliteMetadataStore,
};
use crate::utils::paths::{key_path, metadata_db_path, secrets_path};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Fully wired service graph. One instance backs both the direct API and the
/// protocol server.
pub struct App {
    pub logger: Logger,
    pub connections: Arc<ConnectionRegistry>,
    pub apis: Arc<ApiRegistry>,
    pub executor: Arc<CallExecutor>,
    pub tool_executor: Arc<ToolExecutor>,
}

impl App {
    fn validate_tool_wiring(handlers: &HashMap<String, Arc<dyn ToolHandler>>) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !handlers.contains_key(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_hint("Every tool in tool_catalog.json must have a handler.")
            .with_details(serde_json::json!({ "missing_tools": missing })))
    }

    pub fn from_config(config: &Config) -> Result<Self, ToolError> {
        let metadata: Arc<dyn MetadataStore> = match config.metadata_backend {
            MetadataBackend::Sqlite => {
                Arc::new(SqliteMetadataStore::open(metadata_db_path(&config.data_dir))?)
            }
            MetadataBackend::Memory => Arc::new(MemoryMetadataStore::new()),
        };
        let secrets: Arc<dyn SecretStore> = match config.secret_backend {
            SecretBackend::File => {
                let security = Security::load(
                    config.encryption_key.as_ref().map(|key| key.as_str()),
                    &key_path(&config.data_dir),
                )?;
                Arc::new(FileSecretStore::open(secrets_path(&config.data_dir), security)?)
            }
            SecretBackend::Memory => Arc::new(MemorySecretStore::new()),
        };
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        Self::with_parts(metadata, secrets, transport, config.executor_settings())
    }

    /// Wires the graph over caller-provided stores and transport.
    pub fn with_parts(
        metadata: Arc<dyn MetadataStore>,
        secrets: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
        settings: ExecutorSettings,
    ) -> Result<Self, ToolError> {
        let logger = Logger::new("api-registry");
        let connections = Arc::new(ConnectionRegistry::new(
            logger.clone(),
            metadata.clone(),
            secrets,
        ));
        let apis = Arc::new(ApiRegistry::new(logger.clone(), metadata));
        let executor = Arc::new(CallExecutor::new(
            logger.clone(),
            connections.clone(),
            transport,
            settings,
        ));
        let manager = Arc::new(ApiRegistryManager::new(
            logger.clone(),
            Validation::new(),
            connections.clone(),
            apis.clone(),
            executor.clone(),
        ));

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        for &action in API_ACTIONS {
            handlers.insert(
                action.to_string(),
                Arc::new(ApiTool::new(manager.clone(), action)),
            );
        }
        Self::validate_tool_wiring(&handlers)?;

        let tool_executor = Arc::new(ToolExecutor::new(logger.clone(), handlers));
        Ok(Self {
            logger,
            connections,
            apis,
            executor,
            tool_executor,
        })
    }

    /// Runs one tool call with `credentials` in scope. The context is cleared
    /// when the call ends, whatever the outcome.
    pub async fn dispatch(
        &self,
        surface: Surface,
        tool: &str,
        args: Value,
        credentials: CredentialContext,
        requested_by: Option<String>,
    ) -> Result<Value, ToolError> {
        within(credentials, |credentials| async move {
            let ctx = CallContext::new(surface, credentials).with_requested_by(requested_by);
            self.tool_executor.execute(tool, args, &ctx).await
        })
        .await
    }

    /// Direct path: the same tool set and result shape as `tools/call`.
    pub async fn invoke(
        &self,
        tool: &str,
        args: Value,
        credentials: CredentialContext,
    ) -> Result<Value, ToolError> {
        self.dispatch(Surface::Direct, tool, args, credentials, None)
            .await
    }

    pub async fn invoke_as(
        &self,
        caller: &str,
        tool: &str,
        args: Value,
        credentials: CredentialContext,
    ) -> Result<Value, ToolError> {
        self.dispatch(
            Surface::Direct,
            tool,
            args,
            credentials,
            Some(caller.to_string()),
        )
        .await
    }
}
