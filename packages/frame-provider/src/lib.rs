//! # Frame Provider
//!
//! An asynchronous JSON-RPC client for code running inside an embedded
//! context (a child frame, a worker) that talks to a privileged parent over
//! a one-way message channel.
//!
//! ## Core Concepts
//!
//! The channel only posts messages; it never answers them. The provider
//! turns it into a request/response client:
//! - Every outbound call gets a fresh [`CallId`] and a slot in the
//!   pending-call table
//! - Every inbound message is checked against that table by id
//! - Messages that name a known method are fanned out as [`ProviderEvent`]s
//!
//! ## Architecture
//!
//! ```text
//! caller
//!     │ request()
//!     ▼
//! FrameProvider ──► EmbeddingDetector (refuse if top-level)
//!     │
//!     ├─► PendingCalls.register(id) ─► timer task (expire after timeout)
//!     │
//!     └─► Transport.send(envelope, target_origin) ──────► parent
//!                                                           │
//!                                                           │ post
//!                                                           ▼
//! Transport handler ─► handle_message()
//!     │
//!     ├─► id pending? ─► resolve / reject ─► caller's future completes
//!     │
//!     └─► method known? ─► EventEmitter listeners + EventBus stream
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Exactly one outcome per call** - result, remote error, or timeout
//! 2. **Settled calls leave the table** - late or duplicate responses are ignored
//! 3. **Unique ids** - no two live calls share an identifier
//! 4. **No ambient globals** - transport and detector are injected
//!
//! ## Example
//!
//! ```ignore
//! use frame_provider::{AlwaysEmbedded, FrameProvider, ProviderConfig};
//! use serde_json::json;
//!
//! let provider = FrameProvider::builder(transport, AlwaysEmbedded)
//!     .with_config(ProviderConfig::from_env()?)
//!     .build();
//!
//! provider.on_accounts_changed(|accounts| tracing::info!(?accounts, "accounts changed"));
//!
//! let accounts: Vec<String> = provider.request_as("eth_accounts", None).await?;
//! let signature = provider
//!     .request("eth_sign", Some(json!([accounts[0], "0xdeadbeef"])))
//!     .await?;
//! ```

// Core modules
mod bus;
mod config;
mod error;
mod events;
mod id;
mod pending;
mod provider;
mod transport;

// Wire format
pub mod protocol;

// Callback-style entry point
pub mod legacy;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export identifier
pub use id::CallId;

// Re-export error types
pub use crate::error::{MalformedMessage, ProviderError, RpcError, TransportError};

// Re-export event types
pub use events::{EventEmitter, EventName, Listener, ListenerId, ProviderEvent};

// Re-export bus types
pub use bus::EventBus;

// Re-export configuration
pub use config::{ProviderConfig, ANY_ORIGIN, DEFAULT_TIMEOUT};

// Re-export provider types (primary entry point)
pub use provider::{FrameProvider, FrameProviderBuilder};

// Re-export capability traits
pub use transport::{AlwaysEmbedded, EmbeddingDetector, MessageHandler, NeverEmbedded, Transport};

// Re-export pending-call table
pub use pending::PendingCalls;

// Re-export wire types
pub use protocol::{InboundMessage, RequestEnvelope, ResponseOutcome, PROTOCOL_VERSION};

// Re-export legacy entry point
pub use legacy::{send_async, LegacyPayload};
