use crate::errors::{BrokerError, BrokerResult};
use crate::models::{AuthFlavor, SecretValue};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Ephemeral carrier for raw credentials supplied at the boundary.
///
/// Each flavor slot is consumed at most once. Values are wiped when taken,
/// when the context is cleared and when the last clone is dropped. The
/// getter is crate-private: only connection create/replace read it.
#[derive(Clone, Default)]
pub struct CredentialContext {
    slots: Arc<Mutex<HashMap<AuthFlavor, SecretValue>>>,
}

impl CredentialContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supply(&self, flavor: AuthFlavor, value: SecretValue) {
        if !flavor.requires_secret() {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(|err| err.into_inner());
        slots.insert(flavor, value);
    }

    pub(crate) fn take(&self, flavor: AuthFlavor) -> Option<SecretValue> {
        let mut slots = self.slots.lock().unwrap_or_else(|err| err.into_inner());
        slots.remove(&flavor)
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|err| err.into_inner());
        slots.clear();
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|err| err.into_inner());
        slots.is_empty()
    }

    /// Flavors currently held, never their values.
    pub fn flavors(&self) -> Vec<AuthFlavor> {
        let slots = self.slots.lock().unwrap_or_else(|err| err.into_inner());
        let mut out: Vec<AuthFlavor> = slots.keys().copied().collect();
        out.sort_by_key(|flavor| flavor.as_str());
        out
    }

    /// Builds a context from a protocol `_meta.credentials` object such as
    /// `{"api_key": "..."}`. Unknown keys are rejected; blank values ignored.
    pub fn from_boundary(value: Option<&Value>) -> BrokerResult<Self> {
        let ctx = Self::new();
        let Some(value) = value else {
            return Ok(ctx);
        };
        if value.is_null() {
            return Ok(ctx);
        }
        let obj = value
            .as_object()
            .ok_or_else(|| BrokerError::invalid("_meta.credentials must be an object"))?;
        for (key, raw) in obj {
            let flavor: AuthFlavor = key.parse()?;
            if !flavor.requires_secret() {
                return Err(BrokerError::invalid(
                    "_meta.credentials only accepts api_key or bearer_token",
                ));
            }
            let text = raw.as_str().ok_or_else(|| {
                BrokerError::invalid(format!("_meta.credentials.{} must be a string", key))
            })?;
            let secret = SecretValue::new(text);
            if !secret.is_blank() {
                ctx.supply(flavor, secret);
            }
        }
        Ok(ctx)
    }
}

impl fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialContext")
            .field("flavors", &self.flavors())
            .finish()
    }
}

struct ClearOnDrop(CredentialContext);

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// Scoped acquisition: `raw` is visible to `f` through the context and is
/// cleared on every exit path, including cancellation of the future.
pub async fn with_credential<F, Fut, T>(raw: SecretValue, flavor: AuthFlavor, f: F) -> T
where
    F: FnOnce(CredentialContext) -> Fut,
    Fut: Future<Output = T>,
{
    let ctx = CredentialContext::new();
    ctx.supply(flavor, raw);
    within(ctx, f).await
}

/// Same as [`with_credential`] for an already assembled context.
pub async fn within<F, Fut, T>(ctx: CredentialContext, f: F) -> T
where
    F: FnOnce(CredentialContext) -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = ClearOnDrop(ctx.clone());
    f(ctx).await
}
