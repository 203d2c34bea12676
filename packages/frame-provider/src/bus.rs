//! Broadcast channel for provider events.
//!
//! Listeners registered through [`EventEmitter`](crate::EventEmitter) run
//! synchronously on the inbound path. Async consumers that would rather
//! `.await` events subscribe here instead.
//!
//! # Guarantees
//!
//! - **At-most-once delivery**: Slow receivers may miss events
//! - **In-memory only**: Events are not persisted
//! - **No replay**: Lagged receivers get `RecvError::Lagged`

use tokio::sync::broadcast;

use crate::events::ProviderEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CAPACITY: usize = 256;

/// Broadcast bus carrying every emitted [`ProviderEvent`].
///
/// # Example
///
/// ```ignore
/// let mut events = provider.subscribe();
///
/// while let Ok(event) = events.recv().await {
///     if let ProviderEvent::ChainChanged(chain) = event {
///         println!("switched to {chain}");
///     }
/// }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProviderEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events can be buffered before
    /// slow receivers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    pub fn emit(&self, event: ProviderEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
