use crate::constants::limits::MAX_BODY_BYTES;
use crate::constants::network::{
    DEFAULT_HTTP_ADDR, MAX_CONCURRENT_CALLS, MAX_TIMEOUT_MS, TIMEOUT_API_REQUEST_MS,
};
use crate::errors::{BrokerError, BrokerResult};
use crate::services::call_executor::ExecutorSettings;
use crate::utils::paths::{normalize_env_path, resolve_data_dir};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretBackend {
    File,
    Memory,
}

impl FromStr for MetadataBackend {
    type Err = BrokerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "" | "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(BrokerError::invalid(format!(
                "APIREG_METADATA_BACKEND must be sqlite or memory (got '{}')",
                other
            ))),
        }
    }
}

impl FromStr for SecretBackend {
    type Err = BrokerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "" | "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(BrokerError::invalid(format!(
                "APIREG_SECRET_BACKEND must be file or memory (got '{}')",
                other
            ))),
        }
    }
}

/// Process configuration, read once at startup from the environment.
#[derive(Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metadata_backend: MetadataBackend,
    pub secret_backend: SecretBackend,
    pub encryption_key: Option<Zeroizing<String>>,
    pub http_addr: SocketAddr,
    pub request_timeout_ms: u64,
    pub max_body_bytes: usize,
    pub max_concurrent_calls: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("metadata_backend", &self.metadata_backend)
            .field("secret_backend", &self.secret_backend)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[REDACTED]"))
            .field("http_addr", &self.http_addr)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            metadata_backend: MetadataBackend::Sqlite,
            secret_backend: SecretBackend::File,
            encryption_key: None,
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            request_timeout_ms: TIMEOUT_API_REQUEST_MS,
            max_body_bytes: MAX_BODY_BYTES,
            max_concurrent_calls: MAX_CONCURRENT_CALLS,
        }
    }
}

fn parse_number<T: FromStr>(name: &str, raw: Option<String>, fallback: T) -> BrokerResult<T> {
    match raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(fallback),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| BrokerError::invalid(format!("{} must be a number (got '{}')", name, value))),
    }
}

impl Config {
    pub fn from_env() -> BrokerResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BrokerResult<Self> {
        let data_dir = match normalize_env_path(lookup("APIREG_DATA_DIR")) {
            Some(path) => path,
            None => resolve_data_dir(),
        };
        let metadata_backend = lookup("APIREG_METADATA_BACKEND")
            .unwrap_or_default()
            .parse()?;
        let secret_backend = lookup("APIREG_SECRET_BACKEND")
            .unwrap_or_default()
            .parse()?;
        let encryption_key = lookup("ENCRYPTION_KEY")
            .filter(|v| !v.trim().is_empty())
            .map(Zeroizing::new);

        let raw_addr = lookup("APIREG_HTTP_ADDR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr = raw_addr.trim().parse::<SocketAddr>().map_err(|_| {
            BrokerError::invalid(format!("APIREG_HTTP_ADDR must be host:port (got '{}')", raw_addr))
        })?;

        let request_timeout_ms = parse_number(
            "APIREG_REQUEST_TIMEOUT_MS",
            lookup("APIREG_REQUEST_TIMEOUT_MS"),
            TIMEOUT_API_REQUEST_MS,
        )?
        .clamp(1, MAX_TIMEOUT_MS);
        let max_body_bytes = parse_number(
            "APIREG_MAX_BODY_BYTES",
            lookup("APIREG_MAX_BODY_BYTES"),
            MAX_BODY_BYTES,
        )?;
        let max_concurrent_calls = parse_number(
            "APIREG_MAX_CONCURRENT_CALLS",
            lookup("APIREG_MAX_CONCURRENT_CALLS"),
            MAX_CONCURRENT_CALLS,
        )?
        .max(1);

        Ok(Self {
            data_dir,
            metadata_backend,
            secret_backend,
            encryption_key,
            http_addr,
            request_timeout_ms,
            max_body_bytes,
            max_concurrent_calls,
        })
    }

    /// In-memory stores and default limits. Nothing touches the disk.
    pub fn in_memory() -> Self {
        Self {
            metadata_backend: MetadataBackend::Memory,
            secret_backend: SecretBackend::Memory,
            ..Self::default()
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            default_timeout_ms: self.request_timeout_ms,
            max_body_bytes: self.max_body_bytes,
            max_concurrent_calls: self.max_concurrent_calls,
        }
    }
}
