//! The provider: outbound call issuer and inbound message classifier.
//!
//! ```text
//! request() ──► detector ──► register ──► arm timer ──► transport.send
//!                                │
//!                                ▼
//!                          PendingCalls ◄── expire (timer task)
//!                                ▲
//! transport ──► handle_message ──┤ id matches: resolve / reject
//!                                │
//!                                └─► method known: EventEmitter + EventBus
//! ```
//!
//! The response check and the notification check run independently on
//! every message, so one message can settle a call and fire an event.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::bus::{EventBus, DEFAULT_CAPACITY};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::events::{EventEmitter, EventName, ListenerId, ProviderEvent};
use crate::id::CallId;
use crate::pending::PendingCalls;
use crate::protocol::{InboundMessage, RequestEnvelope, ResponseOutcome};
use crate::transport::{EmbeddingDetector, MessageHandler, Transport};

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`FrameProvider`].
///
/// # Example
///
/// ```ignore
/// let provider = FrameProviderBuilder::new(transport, AlwaysEmbedded)
///     .with_target_origin("https://wallet.example")
///     .with_default_timeout(Duration::from_secs(30))
///     .build();
/// ```
pub struct FrameProviderBuilder {
    transport: Arc<dyn Transport>,
    detector: Arc<dyn EmbeddingDetector>,
    config: ProviderConfig,
    event_capacity: usize,
}

impl FrameProviderBuilder {
    pub fn new(transport: impl Transport, detector: impl EmbeddingDetector) -> Self {
        Self {
            transport: Arc::new(transport),
            detector: Arc::new(detector),
            config: ProviderConfig::default(),
            event_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.target_origin = origin.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Buffer size of the async event stream returned by
    /// [`FrameProvider::subscribe`].
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the provider and install its inbound handler on the transport.
    pub fn build(self) -> FrameProvider {
        let inner = Arc::new(Inner {
            config: self.config,
            transport: self.transport,
            detector: self.detector,
            pending: Arc::new(PendingCalls::new()),
            emitter: EventEmitter::new(),
            bus: EventBus::with_capacity(self.event_capacity),
        });

        // The transport only holds a weak reference, so dropping the last
        // provider handle tears everything down.
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let handler: MessageHandler = Arc::new(move |message: Value| {
            if let Some(inner) = weak.upgrade() {
                inner.classify(&message);
            }
        });
        inner.transport.subscribe(handler);

        debug!(target_origin = %inner.config.target_origin, "frame provider ready");
        FrameProvider { inner }
    }
}

// =============================================================================
// Provider
// =============================================================================

struct Inner {
    config: ProviderConfig,
    transport: Arc<dyn Transport>,
    detector: Arc<dyn EmbeddingDetector>,
    pending: Arc<PendingCalls>,
    emitter: EventEmitter,
    bus: EventBus,
}

/// Asynchronous JSON-RPC client over a one-way message channel.
///
/// Cloning is cheap; clones share the pending-call table and listeners.
///
/// # Example
///
/// ```ignore
/// use frame_provider::{AlwaysEmbedded, FrameProvider, ProviderEvent};
/// use serde_json::json;
///
/// let provider = FrameProvider::new(transport, AlwaysEmbedded);
///
/// provider.on_accounts_changed(|accounts| println!("accounts: {accounts:?}"));
///
/// let signature = provider
///     .request("eth_sign", Some(json!(["0xabc", "0xdeadbeef"])))
///     .await?;
/// ```
#[derive(Clone)]
pub struct FrameProvider {
    inner: Arc<Inner>,
}

impl FrameProvider {
    /// Create a provider with the default configuration.
    pub fn new(transport: impl Transport, detector: impl EmbeddingDetector) -> Self {
        FrameProviderBuilder::new(transport, detector).build()
    }

    /// Start building a provider.
    pub fn builder(
        transport: impl Transport,
        detector: impl EmbeddingDetector,
    ) -> FrameProviderBuilder {
        FrameProviderBuilder::new(transport, detector)
    }

    /// The configuration this provider was built with.
    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Call `method` on the parent using the default timeout.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value, ProviderError> {
        self.request_timeout(method, params, self.inner.config.default_timeout)
            .await
    }

    /// Call `method` and decode the result into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<T, ProviderError> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(|e| ProviderError::Decode {
            message: e.to_string(),
        })
    }

    /// Call `method` on the parent, giving up after `timeout`.
    ///
    /// Exactly one outcome is delivered per call: the parent's result, the
    /// parent's error, or [`ProviderError::Timeout`]. The envelope is sent
    /// once and never retried. Dropping the returned future cancels the
    /// call and frees its table entry.
    pub async fn request_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let method = method.into();

        if !self.inner.detector.is_embedded() {
            debug!(method = %method, "refusing call outside an embedded context");
            return Err(ProviderError::NotEmbedded);
        }

        let pending = &self.inner.pending;
        let (id, receiver) = loop {
            let id = CallId::new();
            if let Some(receiver) = pending.register(id.clone(), method.as_str()) {
                break (id, receiver);
            }
        };
        let _guard = CancelOnDrop {
            pending: pending.clone(),
            id: id.clone(),
        };

        let timer = tokio::spawn({
            let pending = pending.clone();
            let id = id.clone();
            async move {
                tokio::time::sleep(timeout).await;
                pending.expire(&id, timeout);
            }
        });
        pending.arm_timer(&id, timer.abort_handle());

        let envelope = RequestEnvelope::new(id.clone(), method, params);
        let message = match envelope.to_value() {
            Ok(message) => message,
            Err(err) => {
                pending.cancel(&id);
                return Err(ProviderError::Transport {
                    message: format!("failed to encode request: {err}"),
                });
            }
        };
        debug!(id = %id, method = %envelope.method, ?timeout, "sending request");
        if let Err(err) = self
            .inner
            .transport
            .send(message, &self.inner.config.target_origin)
        {
            pending.cancel(&id);
            return Err(err.into());
        }

        match receiver.await {
            Ok(outcome) => outcome,
            // Sender dropped without an outcome: the entry was cancelled.
            Err(_) => Err(ProviderError::Cancelled { id }),
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Classify one inbound payload.
    ///
    /// Normally invoked by the transport subscription installed at build
    /// time. Never fails: anything that is not a protocol message is ignored.
    pub fn handle_message(&self, message: &Value) {
        self.inner.classify(message);
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Register a listener for `name`.
    pub fn on<F>(&self, name: EventName, listener: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.on(name, listener)
    }

    /// Register a listener that fires at most once.
    pub fn once<F>(&self, name: EventName, listener: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.once(name, listener)
    }

    /// Remove a listener.
    pub fn off(&self, name: EventName, id: ListenerId) -> bool {
        self.inner.emitter.off(name, id)
    }

    pub fn listener_count(&self, name: EventName) -> usize {
        self.inner.emitter.listener_count(name)
    }

    pub fn remove_all_listeners(&self, name: Option<EventName>) {
        self.inner.emitter.remove_all_listeners(name)
    }

    pub fn on_connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventName::Connect, move |event| {
            if let ProviderEvent::Connect = event {
                listener()
            }
        })
    }

    pub fn on_close<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(i64, &str) + Send + Sync + 'static,
    {
        self.on(EventName::Close, move |event| {
            if let ProviderEvent::Close { code, reason } = event {
                listener(*code, reason)
            }
        })
    }

    pub fn on_notification<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(EventName::Notification, move |event| {
            if let ProviderEvent::Notification(payload) = event {
                listener(payload)
            }
        })
    }

    pub fn on_chain_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventName::ChainChanged, move |event| {
            if let ProviderEvent::ChainChanged(chain_id) = event {
                listener(chain_id)
            }
        })
    }

    pub fn on_network_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventName::NetworkChanged, move |event| {
            if let ProviderEvent::NetworkChanged(network_id) = event {
                listener(network_id)
            }
        })
    }

    pub fn on_accounts_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.on(EventName::AccountsChanged, move |event| {
            if let ProviderEvent::AccountsChanged(accounts) = event {
                listener(accounts)
            }
        })
    }

    /// Async stream of every emitted event.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.bus.subscribe()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, id: &CallId) -> bool {
        self.inner.pending.contains(id)
    }

    /// Reject every outstanding call with [`ProviderError::Cancelled`].
    ///
    /// Returns the number of calls that were cancelled. The provider stays
    /// usable for new calls.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.inner.pending.clear();
        if cancelled > 0 {
            debug!(cancelled, "cancelled outstanding calls");
        }
        cancelled
    }
}

impl std::fmt::Debug for FrameProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProvider")
            .field("config", &self.inner.config)
            .field("pending", &self.inner.pending)
            .field("emitter", &self.inner.emitter)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn classify(&self, message: &Value) {
        let InboundMessage {
            id,
            outcome,
            method,
            params,
        } = match InboundMessage::parse(message) {
            Ok(parsed) => parsed,
            Err(reason) => {
                trace!(%reason, "ignoring inbound message");
                return;
            }
        };

        if let Some(id) = id {
            match outcome {
                Some(ResponseOutcome::Error(err)) => {
                    self.pending.reject(&id, ProviderError::Rpc(err));
                }
                Some(ResponseOutcome::Result(result)) => {
                    self.pending.resolve(&id, result);
                }
                None if self.pending.contains(&id) => {
                    debug!(
                        id = %id,
                        has_response_fields = InboundMessage::has_response_fields(message),
                        "response without a usable result or error, call stays pending"
                    );
                }
                None => {}
            }
        }

        if let Some(method) = method {
            self.dispatch_notification(&method, params.as_ref());
        }
    }

    fn dispatch_notification(&self, method: &str, params: Option<&Value>) {
        let Some(name) = EventName::from_method(method) else {
            trace!(method, "ignoring unrecognized notification");
            return;
        };
        let Some(event) = ProviderEvent::from_params(name, params) else {
            debug!(event = %name, "notification params do not match the event signature");
            return;
        };

        self.emitter.emit(&event);
        self.bus.emit(event);
    }
}

/// Removes the call's entry if the caller stops waiting early.
struct CancelOnDrop {
    pending: Arc<PendingCalls>,
    id: CallId,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.pending.cancel(&self.id);
    }
}
