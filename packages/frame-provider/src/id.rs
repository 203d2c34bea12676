//! Call identifiers.
//!
//! Every outbound request carries a [`CallId`] that the remote party echoes
//! back on its response. Identifiers travel as JSON strings so that no JSON
//! implementation on either side of the channel can lose precision on them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Correlation token pairing one request envelope with at most one response.
///
/// Fresh identifiers are random UUID v4 values, so the chance of colliding
/// with another outstanding call is negligible for the lifetime of a
/// provider.
///
/// # Example
///
/// ```ignore
/// use frame_provider::CallId;
///
/// let id = CallId::new();
/// assert_ne!(id, CallId::new());
///
/// // Identifiers received from the wire
/// let echoed = CallId::from_wire(&serde_json::json!(id.as_str()));
/// assert_eq!(echoed, Some(id));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a new random call identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Read an identifier from the `id` field of an inbound message.
    ///
    /// Strings are taken verbatim. Numbers are accepted in their decimal
    /// rendering so peers that echo numeric ids still correlate. `null`
    /// and every other JSON type yield `None`.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<Uuid> for CallId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
