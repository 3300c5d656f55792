use crate::constants::secrets::{API_KEY_SCOPE, BEARER_TOKEN_SCOPE, DEFAULT_API_KEY_PARAM};
use crate::errors::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// The closed set of authentication contracts a connection can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlavor {
    None,
    ApiKey,
    BearerToken,
}

impl AuthFlavor {
    pub const ALL: [AuthFlavor; 3] = [AuthFlavor::None, AuthFlavor::ApiKey, AuthFlavor::BearerToken];

    pub fn as_str(self) -> &'static str {
        match self {
            AuthFlavor::None => "none",
            AuthFlavor::ApiKey => "api_key",
            AuthFlavor::BearerToken => "bearer_token",
        }
    }

    /// Shared scope used when the caller does not name one.
    pub fn default_scope(self) -> Option<&'static str> {
        match self {
            AuthFlavor::None => None,
            AuthFlavor::ApiKey => Some(API_KEY_SCOPE),
            AuthFlavor::BearerToken => Some(BEARER_TOKEN_SCOPE),
        }
    }

    pub fn requires_secret(self) -> bool {
        !matches!(self, AuthFlavor::None)
    }
}

impl fmt::Display for AuthFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthFlavor {
    type Err = BrokerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "" | "none" => Ok(AuthFlavor::None),
            "api_key" | "apikey" => Ok(AuthFlavor::ApiKey),
            "bearer_token" | "bearer" => Ok(AuthFlavor::BearerToken),
            other => Err(BrokerError::invalid(format!(
                "auth_flavor must be one of none, api_key, bearer_token (got '{}')",
                other
            ))),
        }
    }
}

/// Caller intent for a new connection. Turned into a [`Connection`] by the
/// registry, which owns scope/key assignment.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub name: String,
    pub host: String,
    pub base_path: Option<String>,
    pub auth_flavor: AuthFlavor,
    pub secret_scope: Option<String>,
    pub api_key_param: Option<String>,
}

impl ConnectionSpec {
    pub fn new(name: impl Into<String>, host: impl Into<String>, auth_flavor: AuthFlavor) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            base_path: None,
            auth_flavor,
            secret_scope: None,
            api_key_param: None,
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_secret_scope(mut self, scope: impl Into<String>) -> Self {
        self.secret_scope = Some(scope.into());
        self
    }

    pub fn with_api_key_param(mut self, param: impl Into<String>) -> Self {
        self.api_key_param = Some(param.into());
        self
    }
}

/// Reusable authentication state for one logical API. Holds references to a
/// secret, never the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    pub auth_flavor: AuthFlavor,
    pub secret_scope: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_param: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    /// Builds a connection from already-normalized parts, assigning the scope
    /// and key for the flavor. The key is always the connection name.
    pub(crate) fn from_normalized(
        name: String,
        host: String,
        base_path: Option<String>,
        auth_flavor: AuthFlavor,
        secret_scope: Option<String>,
        api_key_param: Option<String>,
    ) -> Self {
        let (secret_scope, secret_key) = match auth_flavor.default_scope() {
            None => (None, None),
            Some(default_scope) => (
                Some(secret_scope.unwrap_or_else(|| default_scope.to_string())),
                Some(name.clone()),
            ),
        };
        let api_key_param = match auth_flavor {
            AuthFlavor::ApiKey => {
                Some(api_key_param.unwrap_or_else(|| DEFAULT_API_KEY_PARAM.to_string()))
            }
            _ => None,
        };
        Self {
            name,
            host,
            base_path,
            auth_flavor,
            secret_scope,
            secret_key,
            api_key_param,
            created_at: Utc::now(),
        }
    }

    /// Checks the flavor/scope coupling. Stores call this on every load so a
    /// corrupted row surfaces instead of being used.
    pub fn check_invariants(&self) -> BrokerResult<()> {
        let has_scope = self.secret_scope.is_some();
        if self.auth_flavor.requires_secret() != has_scope {
            return Err(BrokerError::store(format!(
                "connection '{}' has auth flavor {} but secret scope {}",
                self.name,
                self.auth_flavor,
                if has_scope { "set" } else { "missing" }
            )));
        }
        if let Some(key) = &self.secret_key {
            if key != &self.name {
                return Err(BrokerError::store(format!(
                    "connection '{}' has secret key '{}' (expected the connection name)",
                    self.name, key
                )));
            }
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("{}{}", self.host, self.base_path.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Pending,
    Valid,
    Error,
}

impl ApiStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiStatus::Pending => "pending",
            ApiStatus::Valid => "valid",
            ApiStatus::Error => "error",
        }
    }
}

impl FromStr for ApiStatus {
    type Err = BrokerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Ok(ApiStatus::Pending),
            "valid" => Ok(ApiStatus::Valid),
            "error" => Ok(ApiStatus::Error),
            other => Err(BrokerError::invalid(format!(
                "status must be one of pending, valid, error (got '{}')",
                other
            ))),
        }
    }
}

/// A raw credential in memory. Wiped on drop, redacted in `Debug`, and
/// deliberately not `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<String>);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

/// Non-secret metadata about a logical API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub api_id: String,
    pub api_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub connection_name: String,
    #[serde(default)]
    pub documentation_url: Option<String>,
    /// Representative paths. Informational only, never an allow-list.
    #[serde(default)]
    pub available_endpoints: Vec<String>,
    #[serde(default)]
    pub example_calls: Vec<Value>,
    pub status: ApiStatus,
    #[serde(default)]
    pub validation_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub requested_by: String,
}

/// Filter for listing registry entries.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub status: Option<ApiStatus>,
    pub connection_name: Option<String>,
}

impl EntryFilter {
    pub fn by_connection(name: impl Into<String>) -> Self {
        Self {
            status: None,
            connection_name: Some(name.into()),
        }
    }

    pub fn matches(&self, entry: &RegistryEntry) -> bool {
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(name) = &self.connection_name {
            if &entry.connection_name != name {
                return false;
            }
        }
        true
    }
}
