//! Capabilities the provider is built on.
//!
//! The provider never touches a concrete channel. It is handed a
//! [`Transport`] that can post a JSON payload towards the parent and invoke
//! a handler for every payload coming back, plus an [`EmbeddingDetector`]
//! that says whether there is a parent to talk to at all.

use std::sync::Arc;

use serde_json::Value;

use crate::error::TransportError;

/// Handler invoked once per inbound payload.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A one-way, fire-and-forget message channel to the parent context.
///
/// Delivery is asynchronous and unordered, with no acknowledgement and no
/// backpressure. Implementations enforce the target-origin restriction
/// themselves; the provider only passes it along.
///
/// # Example
///
/// ```ignore
/// struct ChannelTransport {
///     outbound: tokio::sync::mpsc::UnboundedSender<Value>,
///     handler: Mutex<Option<MessageHandler>>,
/// }
///
/// impl Transport for ChannelTransport {
///     fn send(&self, message: Value, _target_origin: &str) -> Result<(), TransportError> {
///         self.outbound.send(message).map_err(|_| TransportError::Closed)
///     }
///
///     fn subscribe(&self, handler: MessageHandler) {
///         *self.handler.lock().unwrap() = Some(handler);
///     }
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Post a payload to the parent, restricted to `target_origin`.
    fn send(&self, message: Value, target_origin: &str) -> Result<(), TransportError>;

    /// Install the handler for inbound payloads.
    fn subscribe(&self, handler: MessageHandler);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, message: Value, target_origin: &str) -> Result<(), TransportError> {
        (**self).send(message, target_origin)
    }

    fn subscribe(&self, handler: MessageHandler) {
        (**self).subscribe(handler)
    }
}

/// Answers whether the current context is nested inside a parent.
///
/// Consulted before every call.
pub trait EmbeddingDetector: Send + Sync + 'static {
    fn is_embedded(&self) -> bool;
}

impl<F> EmbeddingDetector for F
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn is_embedded(&self) -> bool {
        self()
    }
}

/// Detector for contexts known to be embedded.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEmbedded;

impl EmbeddingDetector for AlwaysEmbedded {
    fn is_embedded(&self) -> bool {
        true
    }
}

/// Detector for contexts known to be top-level.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverEmbedded;

impl EmbeddingDetector for NeverEmbedded {
    fn is_embedded(&self) -> bool {
        false
    }
}
