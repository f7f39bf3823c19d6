//! JSON-RPC 2.0 Types
//!
//! Base types for JSON-RPC 2.0 protocol as used by MCP.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ErrorData;

/// JSON-RPC version constant - always "2.0".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected JSON-RPC version '2.0', got '{}'",
                s
            )))
        }
    }
}

/// Request ID - can be a string or integer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Default params for requests and notifications: an empty object.
///
/// Wire rule: params always serialize as `{}` when empty, never as `[]`
/// and never omitted.
fn empty_params() -> Value {
    Value::Object(Map::new())
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl Request {
    /// Create a new request with empty params.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params: empty_params(),
        }
    }

    /// Create a new request with params.
    pub fn with_params(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl Notification {
    /// Create a new notification with empty params.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params: empty_params(),
        }
    }

    /// Create a new notification with params.
    pub fn with_params(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub result: Value,
}

impl Response {
    /// Create a new successful response.
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            result,
        }
    }
}

/// A JSON-RPC 2.0 error response.
///
/// The id may be null when the request it answers could not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub jsonrpc: JsonRpcVersion,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub error: ErrorData,
}

impl ErrorResponse {
    /// Create a new error response for a known request id.
    pub fn new(id: impl Into<RequestId>, error: ErrorData) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: Some(id.into()),
            error,
        }
    }

    /// Create an error response with a null id (unparseable request).
    pub fn without_id(error: ErrorData) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: None,
            error,
        }
    }
}

/// A classified JSON-RPC message.
///
/// The codec classifies every decoded wire document into exactly one of
/// these variants. A document whose method starts with `notifications/`
/// is always a notification, id or not.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
    Error(ErrorResponse),
}

impl Message {
    /// The request id this message carries, if any.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Notification(_) => None,
            Message::Response(r) => Some(&r.id),
            Message::Error(e) => e.id.as_ref(),
        }
    }

    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// True for responses and error responses (terminal replies).
    pub fn is_reply(&self) -> bool {
        matches!(self, Message::Response(_) | Message::Error(_))
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl From<ErrorResponse> for Message {
    fn from(e: ErrorResponse) -> Self {
        Message::Error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_number() {
        let id = RequestId::Number(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");

        let parsed: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_request_id_string() {
        let id = RequestId::String("abc-123".to_string());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc-123\"");

        let parsed: RequestId = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_request_serialization() {
        let request = Request::with_params(1, "tools/call", json!({ "name": "hello" }));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "tools/call");
        assert_eq!(json["params"]["name"], "hello");
    }

    #[test]
    fn test_empty_params_serialize_as_object() {
        let request = Request::new(7, "ping");
        let json = serde_json::to_value(&request).unwrap();

        assert!(json["params"].is_object());
        assert_eq!(json["params"], json!({}));
    }

    #[test]
    fn test_request_roundtrip() {
        let original = Request::with_params(
            "req-1",
            "initialize",
            json!({ "protocolVersion": "2025-06-18" }),
        );

        let json = serde_json::to_string(&original).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, RequestId::String("req-1".to_string()));
        assert_eq!(parsed.method, "initialize");
    }

    #[test]
    fn test_missing_params_default_to_empty_object() {
        let parsed: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert_eq!(parsed.params, json!({}));
    }

    #[test]
    fn test_version_rejected() {
        let result: Result<Request, _> =
            serde_json::from_str(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_notification() {
        let notif = Notification::new("notifications/initialized");

        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "notifications/initialized");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_response_success() {
        let response = Response::success(1, json!({ "tools": [] }));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert!(json["result"]["tools"].is_array());
    }

    #[test]
    fn test_error_response_null_id() {
        let err = ErrorResponse::without_id(super::super::error::ErrorData::parse_error("bad"));
        let json = serde_json::to_value(&err).unwrap();
        assert!(json["id"].is_null());
        assert_eq!(json["error"]["code"], -32700);
    }

    #[test]
    fn test_message_accessors() {
        let req = Message::Request(Request::new(3, "ping"));
        assert_eq!(req.id(), Some(&RequestId::Number(3)));
        assert_eq!(req.method(), Some("ping"));
        assert!(!req.is_reply());

        let resp = Message::Response(Response::success(3, json!({})));
        assert!(resp.is_reply());
    }
}
