//! Testing utilities for code built on the provider.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! frame-provider = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use frame_provider::testing::{EventRecorder, FakeTransport};
//! use frame_provider::{AlwaysEmbedded, EventName, FrameProvider};
//!
//! let transport = FakeTransport::new();
//! let provider = FrameProvider::new(transport.clone(), AlwaysEmbedded);
//!
//! // Answer every request synchronously
//! transport.respond_with(|request| {
//!     Some(serde_json::json!({
//!         "protocolVersion": "2.0",
//!         "id": request["id"],
//!         "result": [],
//!     }))
//! });
//!
//! let recorder = EventRecorder::attach(&provider, EventName::AccountsChanged);
//! transport.deliver(serde_json::json!({
//!     "protocolVersion": "2.0",
//!     "method": "accountsChanged",
//!     "params": [["0xabc"]],
//! }));
//! assert_eq!(recorder.len(), 1);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use crate::error::TransportError;
use crate::events::{EventName, ProviderEvent};
use crate::provider::FrameProvider;
use crate::transport::{MessageHandler, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A message captured by [`FakeTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message: Value,
    pub target_origin: String,
}

type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// In-memory transport that records outbound messages and lets tests
/// inject inbound ones.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<SentMessage>>,
    handler: Mutex<Option<MessageHandler>>,
    responder: Mutex<Option<Responder>>,
    closed: AtomicBool,
}

impl FakeTransport {
    /// Create a shared fake transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent send fail with [`TransportError::Closed`].
    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    /// Answer each sent message synchronously, from inside `send`.
    ///
    /// The responder sees the outbound envelope; returning `Some(reply)`
    /// delivers `reply` as an inbound message.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Arc::new(responder));
    }

    /// Deliver an inbound message to the subscribed handler.
    ///
    /// Returns `false` if nothing has subscribed yet.
    pub fn deliver(&self, message: Value) -> bool {
        // Clone out so the handler runs without our lock held.
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }

    /// Every message sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// The most recently sent message.
    pub fn last_sent(&self) -> Option<SentMessage> {
        lock(&self.sent).last().cloned()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Identifier of the `index`-th sent request.
    pub fn sent_id(&self, index: usize) -> Option<String> {
        lock(&self.sent)
            .get(index)
            .and_then(|sent| sent.message.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Wait until at least `count` messages were sent.
    ///
    /// # Panics
    ///
    /// Panics if the messages do not show up within about five seconds.
    pub async fn wait_for_sent(&self, count: usize) {
        for _ in 0..5_000 {
            if self.sent_count() >= count {
                return;
            }
            tokio::task::yield_now().await;
            if self.sent_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {count} sent messages, saw {}", self.sent_count());
    }
}

impl Transport for FakeTransport {
    fn send(&self, message: Value, target_origin: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        lock(&self.sent).push(SentMessage {
            message: message.clone(),
            target_origin: target_origin.to_string(),
        });

        let responder = lock(&self.responder).clone();
        if let Some(reply) = responder.and_then(|respond| respond(&message)) {
            self.deliver(reply);
        }
        Ok(())
    }

    fn subscribe(&self, handler: MessageHandler) {
        *lock(&self.handler) = Some(handler);
    }
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("sent", &self.sent_count())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Collects events emitted under one name, in order.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ProviderEvent>>>,
}

impl EventRecorder {
    /// Register a recording listener on `provider` for `name`.
    pub fn attach(provider: &FrameProvider, name: EventName) -> Self {
        let recorder = Self::default();
        let events = recorder.events.clone();
        provider.on(name, move |event| lock(&events).push(event.clone()));
        recorder
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<ProviderEvent> {
        lock(&self.events).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_send_records_message_and_origin() {
        let transport = FakeTransport::new();
        transport.send(json!({"id": "1"}), "https://a.example").unwrap();

        assert_eq!(
            transport.sent(),
            vec![SentMessage {
                message: json!({"id": "1"}),
                target_origin: "https://a.example".into(),
            }]
        );
        assert_eq!(transport.sent_id(0).as_deref(), Some("1"));
    }

    #[test]
    fn test_closed_transport_refuses() {
        let transport = FakeTransport::new();
        transport.set_closed(true);
        assert_eq!(transport.send(json!({}), "*"), Err(TransportError::Closed));
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_deliver_without_subscriber() {
        let transport = FakeTransport::new();
        assert!(!transport.deliver(json!({})));
    }

    #[test]
    fn test_responder_replies_through_handler() {
        let transport = FakeTransport::new();
        let received = Arc::new(AtomicUsize::new(0));
        {
            let received = received.clone();
            transport.subscribe(Arc::new(move |_msg| {
                received.fetch_add(1, Ordering::SeqCst);
            }));
        }
        transport.respond_with(|_| Some(json!({"pong": true})));

        transport.send(json!({"ping": true}), "*").unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
