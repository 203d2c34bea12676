//! Error types for the provider.
//!
//! `ProviderError` is what callers see: every failed call resolves to one of
//! its variants through the same future that would have carried the result.
//! `MalformedMessage` never reaches a caller. The inbound channel may carry
//! traffic meant for someone else, so classification failures are logged and
//! dropped.
//!
//! # Example
//!
//! ```ignore
//! use frame_provider::{FrameProvider, ProviderError};
//!
//! match provider.request("eth_accounts", None).await {
//!     Ok(accounts) => println!("accounts: {accounts}"),
//!     Err(ProviderError::Rpc(err)) if err.code == -32000 => {
//!         eprintln!("parent refused: {}", err.reason);
//!     }
//!     Err(e) if e.is_retryable() => eprintln!("try again later: {e}"),
//!     Err(e) => eprintln!("call failed: {e}"),
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::id::CallId;

// =============================================================================
// Remote Errors
// =============================================================================

/// Structured error returned by the remote party.
///
/// This is also the wire shape of the `error` member of a response envelope:
/// `{"code": <integer>, "reason": <string>, "data"?: <any>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code chosen by the remote party.
    pub code: i64,
    /// Human-readable reason.
    pub reason: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error without a data payload.
    pub fn new(code: i64, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            data: None,
        }
    }

    /// Attach a structured data payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.reason)
    }
}

impl std::error::Error for RpcError {}

// =============================================================================
// Provider Errors
// =============================================================================

/// Errors surfaced to callers of the provider.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The current context is not nested inside a parent, so nothing was sent.
    #[error("not running inside an embedded context")]
    NotEmbedded,

    /// No matching response arrived within the configured window.
    #[error("call {id} timed out after {timeout:?}")]
    Timeout {
        /// Identifier of the evicted call.
        id: CallId,
        /// The window the call was given.
        timeout: Duration,
    },

    /// The remote party answered with a structured error.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The transport refused the outbound envelope.
    #[error("transport error: {message}")]
    Transport {
        /// The underlying error message.
        message: String,
    },

    /// The result could not be decoded into the requested type.
    #[error("failed to decode result: {message}")]
    Decode {
        /// The underlying error message.
        message: String,
    },

    /// The call was cancelled before any outcome arrived.
    #[error("call {id} was cancelled")]
    Cancelled {
        /// Identifier of the cancelled call.
        id: CallId,
    },
}

impl ProviderError {
    /// Returns `true` for failures that may succeed if the caller retries.
    ///
    /// Remote errors are never retryable: the parent made a decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    /// Returns the remote error, if this is one.
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure reported by a transport's send primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel to the parent is gone.
    #[error("channel closed")]
    Closed,

    /// The message could not be handed to the channel.
    #[error("send failed: {0}")]
    Send(String),
}

// =============================================================================
// Malformed Inbound Messages
// =============================================================================

/// Why an inbound message was not treated as part of the protocol.
///
/// Internal to classification; these are logged at `trace` and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    /// The payload is not a JSON object.
    #[error("message is not an object")]
    NotAnObject,

    /// The protocol version field is missing or not the expected literal.
    #[error("unexpected protocol version")]
    WrongVersion,
}
