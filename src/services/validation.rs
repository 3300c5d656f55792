use crate::constants::limits::MAX_NAME_LENGTH;
use crate::constants::network::MAX_TIMEOUT_MS;
use crate::constants::protocols::{ALLOWED_HTTP, DEFAULT_SCHEME};
use crate::errors::{BrokerError, BrokerResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("identifier regex"));

/// Argument checks and the normalization rules for hosts and paths.
#[derive(Clone, Default)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(&self, value: &Value, label: &str) -> BrokerResult<String> {
        let text = value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BrokerError::invalid(format!("{} must be a non-empty string", label)))?;
        Ok(text.to_string())
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> BrokerResult<Option<String>> {
        match value {
            None => Ok(None),
            Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(val) => self.ensure_string(val, label).map(Some),
        }
    }

    /// Names double as secret keys, so they stay within a conservative
    /// character set.
    pub fn ensure_identifier(&self, value: &str, label: &str) -> BrokerResult<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(BrokerError::invalid(format!("{} must be a non-empty string", label)));
        }
        if trimmed.len() > MAX_NAME_LENGTH {
            return Err(BrokerError::invalid(format!(
                "{} must be at most {} characters",
                label, MAX_NAME_LENGTH
            )));
        }
        if !IDENTIFIER.is_match(trimmed) {
            return Err(BrokerError::invalid(format!(
                "{} may only contain letters, digits, '_', '-' and '.'",
                label
            )));
        }
        Ok(trimmed.to_string())
    }

    /// Accepts `api.example.com`, `https://api.example.com` or
    /// `http://localhost:8080` and returns `scheme://authority`.
    pub fn normalize_host(&self, raw: &str) -> BrokerResult<String> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(BrokerError::invalid("host must be a non-empty string"));
        }
        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("{}://{}", DEFAULT_SCHEME, trimmed)
        };
        let url = Url::parse(&candidate)
            .map_err(|err| BrokerError::invalid(format!("host '{}' is not a valid URL: {}", trimmed, err)))?;
        let scheme_label = format!("{}:", url.scheme());
        if !ALLOWED_HTTP.contains(&scheme_label.as_str()) {
            return Err(BrokerError::invalid(format!(
                "host scheme must be http or https (got '{}')",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| BrokerError::invalid(format!("host '{}' has no authority", trimmed)))?;
        if !url.username().is_empty() || url.password().is_some() {
            return Err(BrokerError::invalid(
                "host must not embed credentials; supply them through the credential channel",
            ));
        }
        if url.path() != "/" && !url.path().is_empty() {
            return Err(BrokerError::invalid(format!(
                "host '{}' carries a path ('{}'); move it into base_path",
                trimmed,
                url.path()
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(BrokerError::invalid("host must not carry a query or fragment"));
        }
        Ok(match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        })
    }

    /// Leading `/`, no trailing `/`; empty means none.
    pub fn normalize_base_path(&self, raw: Option<&str>) -> BrokerResult<Option<String>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.contains('?') || trimmed.contains('#') {
            return Err(BrokerError::invalid("base_path must not carry a query or fragment"));
        }
        Ok(Some(format!("/{}", trimmed)))
    }

    /// Call paths are unconstrained apart from shape: a leading `/` is added
    /// and query strings must go through `params`.
    pub fn normalize_call_path(&self, raw: &str) -> BrokerResult<String> {
        let trimmed = raw.trim();
        if trimmed.contains('?') || trimmed.contains('#') {
            return Err(BrokerError::invalid(
                "path must not carry a query string; pass query parameters in params",
            ));
        }
        if trimmed.is_empty() || trimmed == "/" {
            return Ok(String::new());
        }
        if trimmed.starts_with('/') {
            Ok(trimmed.to_string())
        } else {
            Ok(format!("/{}", trimmed))
        }
    }

    /// Flattens a JSON object into string pairs. Nulls and blank keys are
    /// skipped; non-string scalars are rendered.
    pub fn ensure_string_map(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> BrokerResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        let Some(value) = value else {
            return Ok(out);
        };
        if value.is_null() {
            return Ok(out);
        }
        let obj = value
            .as_object()
            .ok_or_else(|| BrokerError::invalid(format!("{} must be an object", label)))?;
        for (key, val) in obj {
            let key = key.trim();
            if key.is_empty() || val.is_null() {
                continue;
            }
            let rendered = val
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| val.to_string());
            out.insert(key.to_string(), rendered);
        }
        Ok(out)
    }

    pub fn ensure_string_list(&self, value: Option<&Value>, label: &str) -> BrokerResult<Vec<String>> {
        match value {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| self.ensure_string(item, label))
                .collect(),
            Some(_) => Err(BrokerError::invalid(format!("{} must be an array of strings", label))),
        }
    }

    pub fn ensure_timeout_ms(&self, value: Option<&Value>, fallback: u64) -> BrokerResult<u64> {
        match value {
            None | Some(Value::Null) => Ok(fallback),
            Some(val) => {
                let ms = val
                    .as_u64()
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| BrokerError::invalid("timeout_ms must be a positive integer"))?;
                Ok(ms.min(MAX_TIMEOUT_MS))
            }
        }
    }

    pub fn ensure_bool(&self, value: Option<&Value>, label: &str, fallback: bool) -> BrokerResult<bool> {
        match value {
            None | Some(Value::Null) => Ok(fallback),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(BrokerError::invalid(format!("{} must be a boolean", label))),
        }
    }
}
