//! Callback-style entry point for older callers.
//!
//! Accepts `{method, params}` and a two-argument completion callback,
//! performs exactly one provider call and forwards its outcome. Carries no
//! state of its own.

use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::ProviderError;
use crate::provider::FrameProvider;

/// Request payload accepted by [`send_async`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyPayload {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl LegacyPayload {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Issue `payload` and report the outcome through `callback(error, result)`.
///
/// Exactly one of the two arguments is `Some`. The call runs on a spawned
/// task; the returned handle resolves once the callback has run.
pub fn send_async<F>(
    provider: &FrameProvider,
    payload: LegacyPayload,
    callback: F,
) -> JoinHandle<()>
where
    F: FnOnce(Option<ProviderError>, Option<Value>) + Send + 'static,
{
    let provider = provider.clone();
    tokio::spawn(async move {
        match provider.request(payload.method, payload.params).await {
            Ok(result) => callback(None, Some(result)),
            Err(err) => callback(Some(err), None),
        }
    })
}
