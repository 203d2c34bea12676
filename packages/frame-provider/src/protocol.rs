//! Wire envelopes.
//!
//! All messages are JSON objects tagged with `"protocolVersion": "2.0"`.
//!
//! ```text
//! request       {protocolVersion, id, method, params?}
//! response      {protocolVersion, id, result}
//!               {protocolVersion, id, error: {code, reason, data?}}
//! notification  {protocolVersion, method, params?}
//! ```
//!
//! Outbound requests are built with serde. Inbound messages are read from a
//! raw [`Value`] instead, because the channel is shared with unrelated
//! traffic and a single message may be both a response and a notification.

use serde::Serialize;
use serde_json::Value;

use crate::error::{MalformedMessage, RpcError};
use crate::id::CallId;

/// The protocol version literal carried by every envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// An outbound request. Built once per call and sent exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestEnvelope {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: &'static str,
    pub id: CallId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(id: CallId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Render the envelope as a JSON value for the transport.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// How a response settles its call.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(RpcError),
}

/// A validated inbound message.
///
/// The response half (`id` + `outcome`) and the notification half
/// (`method` + `params`) are independent: either, both, or neither may be
/// present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InboundMessage {
    /// Present and non-null identifier.
    pub id: Option<CallId>,
    /// `error` or `result`, when either has a usable shape.
    pub outcome: Option<ResponseOutcome>,
    /// Method name, when the message names one.
    pub method: Option<String>,
    /// Raw params accompanying the method.
    pub params: Option<Value>,
}

impl InboundMessage {
    /// Validate the envelope and pull out the fields the classifier needs.
    ///
    /// An `error` member that is not `{code: integer, reason: string}`
    /// leaves the outcome empty, as does a message with neither `error`
    /// nor `result`. `error` wins when both are present; a null `error`
    /// counts as absent.
    pub fn parse(raw: &Value) -> Result<Self, MalformedMessage> {
        let obj = raw.as_object().ok_or(MalformedMessage::NotAnObject)?;

        match obj.get("protocolVersion") {
            Some(Value::String(v)) if v == PROTOCOL_VERSION => {}
            _ => return Err(MalformedMessage::WrongVersion),
        }

        let id = obj.get("id").and_then(CallId::from_wire);

        // `"error": null` is how some peers say "no error".
        let error = obj.get("error").filter(|error| !error.is_null());
        let outcome = match (error, obj.get("result")) {
            (Some(error), _) => serde_json::from_value::<RpcError>(error.clone())
                .ok()
                .map(ResponseOutcome::Error),
            (None, Some(result)) => Some(ResponseOutcome::Result(result.clone())),
            (None, None) => None,
        };

        let method = obj.get("method").and_then(Value::as_str).map(str::to_string);
        let params = obj.get("params").cloned();

        Ok(Self {
            id,
            outcome,
            method,
            params,
        })
    }

    /// Whether the message carries an `error` or `result` member at all,
    /// regardless of its shape.
    pub fn has_response_fields(raw: &Value) -> bool {
        raw.as_object()
            .map(|obj| obj.contains_key("error") || obj.contains_key("result"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_shape() {
        let env = RequestEnvelope::new(
            CallId::from("id-1"),
            "eth_sign",
            Some(json!(["hello", "world"])),
        );
        assert_eq!(
            env.to_value().unwrap(),
            json!({
                "protocolVersion": "2.0",
                "id": "id-1",
                "method": "eth_sign",
                "params": ["hello", "world"],
            })
        );
    }

    #[test]
    fn test_request_envelope_omits_absent_params() {
        let env = RequestEnvelope::new(CallId::from("id-2"), "eth_accounts", None);
        let value = env.to_value().unwrap();
        assert!(value.get("params").is_none());
        assert_eq!(value["protocolVersion"], "2.0");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert_eq!(
            InboundMessage::parse(&json!("hello")),
            Err(MalformedMessage::NotAnObject)
        );
        assert_eq!(
            InboundMessage::parse(&Value::Null),
            Err(MalformedMessage::NotAnObject)
        );
        assert_eq!(
            InboundMessage::parse(&json!([1, 2])),
            Err(MalformedMessage::NotAnObject)
        );
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        assert_eq!(
            InboundMessage::parse(&json!({"id": "a", "result": 1})),
            Err(MalformedMessage::WrongVersion)
        );
        assert_eq!(
            InboundMessage::parse(&json!({"protocolVersion": "1.0", "id": "a", "result": 1})),
            Err(MalformedMessage::WrongVersion)
        );
        assert_eq!(
            InboundMessage::parse(&json!({"protocolVersion": 2.0, "id": "a", "result": 1})),
            Err(MalformedMessage::WrongVersion)
        );
    }

    #[test]
    fn test_parse_result_response() {
        let msg =
            InboundMessage::parse(&json!({"protocolVersion": "2.0", "id": "a", "result": [1]}))
                .unwrap();
        assert_eq!(msg.id, Some(CallId::from("a")));
        assert_eq!(msg.outcome, Some(ResponseOutcome::Result(json!([1]))));
        assert_eq!(msg.method, None);
    }

    #[test]
    fn test_parse_null_result_is_still_a_result() {
        let msg =
            InboundMessage::parse(&json!({"protocolVersion": "2.0", "id": "a", "result": null}))
                .unwrap();
        assert_eq!(msg.outcome, Some(ResponseOutcome::Result(Value::Null)));
    }

    #[test]
    fn test_parse_error_response() {
        let msg = InboundMessage::parse(&json!({
            "protocolVersion": "2.0",
            "id": "a",
            "error": {"code": -32000, "reason": "Unauthorized", "data": {"x": 1}},
        }))
        .unwrap();
        assert_eq!(
            msg.outcome,
            Some(ResponseOutcome::Error(
                RpcError::new(-32000, "Unauthorized").with_data(json!({"x": 1}))
            ))
        );
    }

    #[test]
    fn test_parse_error_wins_over_result() {
        let msg = InboundMessage::parse(&json!({
            "protocolVersion": "2.0",
            "id": "a",
            "result": 1,
            "error": {"code": 5, "reason": "nope"},
        }))
        .unwrap();
        assert!(matches!(msg.outcome, Some(ResponseOutcome::Error(_))));
    }

    #[test]
    fn test_parse_null_error_yields_to_result() {
        let msg = InboundMessage::parse(&json!({
            "protocolVersion": "2.0",
            "id": "a",
            "result": "0x1",
            "error": null,
        }))
        .unwrap();
        assert_eq!(msg.outcome, Some(ResponseOutcome::Result(json!("0x1"))));
    }

    #[test]
    fn test_parse_malformed_error_has_no_outcome() {
        let msg = InboundMessage::parse(&json!({
            "protocolVersion": "2.0",
            "id": "a",
            "error": "boom",
        }))
        .unwrap();
        assert_eq!(msg.outcome, None);
        assert!(InboundMessage::has_response_fields(&json!({"error": "boom"})));
    }

    #[test]
    fn test_parse_null_id_is_absent() {
        let msg = InboundMessage::parse(&json!({
            "protocolVersion": "2.0",
            "id": null,
            "method": "connect",
        }))
        .unwrap();
        assert_eq!(msg.id, None);
        assert_eq!(msg.method.as_deref(), Some("connect"));
    }

    #[test]
    fn test_parse_notification() {
        let msg = InboundMessage::parse(&json!({
            "protocolVersion": "2.0",
            "method": "accountsChanged",
            "params": [["0xabc"]],
        }))
        .unwrap();
        assert_eq!(msg.id, None);
        assert_eq!(msg.outcome, None);
        assert_eq!(msg.method.as_deref(), Some("accountsChanged"));
        assert_eq!(msg.params, Some(json!([["0xabc"]])));
    }

    #[test]
    fn test_parse_non_string_method_is_ignored() {
        let msg = InboundMessage::parse(&json!({"protocolVersion": "2.0", "method": 7})).unwrap();
        assert_eq!(msg.method, None);
    }
}
