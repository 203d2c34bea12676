//! In-process parent and child talking over an mpsc channel.
//!
//! ```text
//! RUST_LOG=frame_provider=trace cargo run -p frame-provider --example loopback
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use frame_provider::{
    AlwaysEmbedded, FrameProvider, MessageHandler, ProviderConfig, Transport, TransportError,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Child side of the channel: posts into an mpsc queue, receives through
/// whatever handler the provider installed.
struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Value>,
    handler: Mutex<Option<MessageHandler>>,
}

impl ChannelTransport {
    fn new(outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            outbound,
            handler: Mutex::new(None),
        }
    }

    fn deliver(&self, message: Value) {
        let handler = self.handler.lock().ok().and_then(|guard| guard.clone());
        if let Some(handler) = handler {
            handler(message);
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: Value, _target_origin: &str) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self, handler: MessageHandler) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }
    }
}

/// The parent's replies to one request. Unknown methods get no answer.
fn answer(request: &Value) -> Vec<Value> {
    let id = request["id"].clone();
    match request["method"].as_str() {
        Some("eth_accounts") => vec![
            json!({
                "protocolVersion": "2.0",
                "method": "accountsChanged",
                "params": [["0xabc"]],
            }),
            json!({"protocolVersion": "2.0", "id": id, "result": ["0xabc"]}),
        ],
        Some("eth_sign") => vec![json!({
            "protocolVersion": "2.0",
            "id": id,
            "error": {"code": 4001, "reason": "User rejected the request"},
        })],
        _ => Vec::new(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,frame_provider=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProviderConfig::from_env().context("Failed to load configuration")?;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(ChannelTransport::new(outbound_tx));
    let provider = FrameProvider::builder(transport.clone(), AlwaysEmbedded)
        .with_config(config)
        .build();

    provider.on_accounts_changed(|accounts| tracing::info!(?accounts, "accounts changed"));

    let parent = tokio::spawn({
        let transport = transport.clone();
        async move {
            while let Some(request) = outbound_rx.recv().await {
                tracing::info!(%request, "parent received request");
                for reply in answer(&request) {
                    transport.deliver(reply);
                }
            }
        }
    });

    let accounts: Vec<String> = provider.request_as("eth_accounts", None).await?;
    tracing::info!(?accounts, "accounts loaded");

    let account = accounts.first().cloned().unwrap_or_default();
    match provider
        .request("eth_sign", Some(json!([account, "0xdeadbeef"])))
        .await
    {
        Ok(signature) => tracing::info!(%signature, "message signed"),
        Err(err) => tracing::warn!(%err, "signing refused"),
    }

    match provider
        .request_timeout("eth_blockNumber", None, Duration::from_millis(200))
        .await
    {
        Ok(block) => tracing::info!(%block, "block number"),
        Err(err) => tracing::warn!(%err, retryable = err.is_retryable(), "no answer"),
    }

    drop(provider);
    parent.abort();
    Ok(())
}
