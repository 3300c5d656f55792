use crate::errors::{ToolError, ToolErrorKind};
use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Failures of the connection registry, the call executor and the secret
/// store. Messages never carry a raw secret value; `hint` fields name scopes
/// and keys only.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: &'static str, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("connection '{name}' uses {flavor} auth and requires a credential")]
    MissingCredential { name: String, flavor: &'static str },

    #[error("connection '{name}' is still referenced by {}", entry_count(.api_ids))]
    ConnectionInUse { name: String, api_ids: Vec<String> },

    #[error("target rejected the credential (HTTP {status})")]
    AuthFailure {
        status: u16,
        secret_scope: Option<String>,
        secret_key: Option<String>,
    },

    #[error("target returned 404 for {effective_url}")]
    PathNotFound { effective_url: String },

    #[error("transport failure: {message}")]
    TransportFailure { message: String, timed_out: bool },

    #[error("registry entry '{api_name}' references missing connection '{connection_name}'")]
    InconsistentReference {
        api_name: String,
        connection_name: String,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("store failure: {0}")]
    Store(String),
}

fn entry_count(api_ids: &[String]) -> String {
    match api_ids.len() {
        1 => "1 registry entry".to_string(),
        n => format!("{} registry entries", n),
    }
}

impl BrokerError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MissingCredential { .. } => "MISSING_CREDENTIAL",
            Self::ConnectionInUse { .. } => "CONNECTION_IN_USE",
            Self::AuthFailure { .. } => "AUTH_FAILURE",
            Self::PathNotFound { .. } => "PATH_NOT_FOUND",
            Self::TransportFailure { .. } => "TRANSPORT_FAILURE",
            Self::InconsistentReference { .. } => "INCONSISTENT_REFERENCE",
            Self::InvalidInput(_) => "INVALID_PARAMS",
            Self::Store(_) => "STORE_FAILURE",
        }
    }

    fn tool_kind(&self) -> ToolErrorKind {
        match self {
            Self::DuplicateName { .. } | Self::ConnectionInUse { .. } => ToolErrorKind::Conflict,
            Self::NotFound { .. } | Self::PathNotFound { .. } => ToolErrorKind::NotFound,
            Self::MissingCredential { .. } | Self::InvalidInput(_) => ToolErrorKind::InvalidParams,
            Self::AuthFailure { .. } => ToolErrorKind::Denied,
            Self::TransportFailure { timed_out: true, .. } => ToolErrorKind::Timeout,
            Self::TransportFailure { .. } => ToolErrorKind::Retryable,
            Self::InconsistentReference { .. } | Self::Store(_) => ToolErrorKind::Internal,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            Self::DuplicateName { .. } => Some(
                "Pick another name, or pass replace=true to drop and recreate the connection."
                    .to_string(),
            ),
            Self::MissingCredential { flavor, .. } => Some(format!(
                "Supply the {} through the credential channel (params._meta.credentials), never inside tool arguments.",
                flavor
            )),
            Self::ConnectionInUse { .. } => Some(
                "Delete the referencing registry entries first (delete_api), or delete with drop_connection=true."
                    .to_string(),
            ),
            Self::AuthFailure {
                secret_scope,
                secret_key,
                ..
            } => Some(match (secret_scope, secret_key) {
                (Some(scope), Some(key)) => format!(
                    "Check your credential: secret scope '{}', key '{}'. Re-register with replace=true to rotate it.",
                    scope, key
                ),
                _ => "Check your credential: the connection has no stored secret (auth flavor none)."
                    .to_string(),
            }),
            Self::PathNotFound { .. } => {
                Some("Check the path against the registered host and base path.".to_string())
            }
            Self::TransportFailure { .. } => Some("Retry later.".to_string()),
            Self::InconsistentReference { .. } => Some(
                "Repair explicitly: re-register the API with replace=true, or delete the dangling entry."
                    .to_string(),
            ),
            Self::NotFound { kind, .. } => match *kind {
                "connection" => Some("Use list_connections to see known connections.".to_string()),
                "api" => Some("Use list_apis to see known apis.".to_string()),
                _ => None,
            },
            Self::InvalidInput(_) | Self::Store(_) => None,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::ConnectionInUse { name, api_ids } => Some(serde_json::json!({
                "connection_name": name,
                "api_ids": api_ids,
            })),
            Self::AuthFailure {
                status,
                secret_scope,
                secret_key,
            } => Some(serde_json::json!({
                "status": status,
                "secret_scope": secret_scope,
                "secret_key": secret_key,
            })),
            Self::PathNotFound { effective_url } => {
                Some(serde_json::json!({ "effective_url": effective_url }))
            }
            _ => None,
        }
    }
}

impl From<BrokerError> for ToolError {
    fn from(err: BrokerError) -> Self {
        let mut out = ToolError::new(err.tool_kind(), err.code(), err.to_string());
        if let Some(hint) = err.hint() {
            out = out.with_hint(hint);
        }
        if let Some(details) = err.details() {
            out = out.with_details(details);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_hint_names_scope_and_key() {
        let err = BrokerError::AuthFailure {
            status: 401,
            secret_scope: Some("mcp_api_keys".to_string()),
            secret_key: Some("fred_api".to_string()),
        };
        let tool: ToolError = err.into();
        assert_eq!(tool.code, "AUTH_FAILURE");
        assert_eq!(tool.kind, ToolErrorKind::Denied);
        let hint = tool.hint.expect("hint");
        assert!(hint.contains("mcp_api_keys"));
        assert!(hint.contains("fred_api"));
    }

    #[test]
    fn transport_failures_are_retryable() {
        let tool: ToolError = BrokerError::transport("connection refused").into();
        assert!(tool.retryable);
        assert_eq!(tool.code, "TRANSPORT_FAILURE");

        let timed_out: ToolError = BrokerError::timeout("deadline elapsed").into();
        assert_eq!(timed_out.kind, ToolErrorKind::Timeout);
        assert!(timed_out.retryable);
    }

    #[test]
    fn not_found_hints_point_at_the_matching_listing() {
        let connection: ToolError = BrokerError::not_found("connection", "github").into();
        assert_eq!(
            connection.hint.as_deref(),
            Some("Use list_connections to see known connections.")
        );
        let api: ToolError = BrokerError::not_found("api", "github").into();
        assert_eq!(api.hint.as_deref(), Some("Use list_apis to see known apis."));
        let secret: ToolError = BrokerError::not_found("secret", "github").into();
        assert!(secret.hint.is_none());
    }

    #[test]
    fn connection_in_use_message_counts_entries() {
        let err = BrokerError::ConnectionInUse {
            name: "github".to_string(),
            api_ids: vec!["api-1".to_string(), "api-2".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "connection 'github' is still referenced by 2 registry entries"
        );
    }
}
