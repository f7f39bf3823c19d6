//! JSON-RPC Message Codec
//!
//! Batch-aware parsing and encoding of JSON-RPC 2.0 wire documents.
//!
//! A frame is either a single object or an array of objects; each element
//! is classified independently, so one malformed entry in a batch does not
//! poison its siblings.

use serde_json::Value;

use crate::types::error::ErrorData;
use crate::types::jsonrpc::{ErrorResponse, Message, Notification, Request, Response};

/// Parse one wire frame into classified messages.
///
/// Invalid JSON yields a single parse error entry (code -32700);
/// an unclassifiable batch element yields an invalid-request entry
/// (code -32600) in its position.
pub fn parse(frame: &str) -> Vec<Result<Message, ErrorData>> {
    let value: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(ErrorData::parse_error(format!("Invalid JSON: {}", e)))];
        }
    };

    match value {
        Value::Array(items) => items.into_iter().map(classify).collect(),
        other => vec![classify(other)],
    }
}

/// Classify a single JSON value as a JSON-RPC message.
///
/// Classification rules:
/// - `method` whose name starts with `notifications/` is always a
///   notification, id or not;
/// - `method` + `id` is a request;
/// - `method` without `id` is a notification;
/// - `result` is a response; `error` is an error response;
/// - anything else is an invalid request.
pub fn classify(value: Value) -> Result<Message, ErrorData> {
    let obj = match &value {
        Value::Object(map) => map,
        _ => {
            return Err(ErrorData::invalid_request(
                "JSON-RPC message must be an object",
            ));
        }
    };

    let method = obj.get("method").and_then(|m| m.as_str());
    let has_id = obj.get("id").map(|id| !id.is_null()).unwrap_or(false);

    if let Some(method) = method {
        // Methods in the notifications/ namespace never get a reply, even
        // when the sender attached an id.
        if method.starts_with("notifications/") || !has_id {
            let notification: Notification = strip_id(value)
                .map_err(|e| ErrorData::invalid_request(format!("Malformed notification: {}", e)))?;
            return Ok(Message::Notification(notification));
        }

        let request: Request = serde_json::from_value(value)
            .map_err(|e| ErrorData::invalid_request(format!("Malformed request: {}", e)))?;
        return Ok(Message::Request(request));
    }

    if obj.contains_key("result") {
        let response: Response = serde_json::from_value(value)
            .map_err(|e| ErrorData::invalid_request(format!("Malformed response: {}", e)))?;
        return Ok(Message::Response(response));
    }

    if obj.contains_key("error") {
        let error: ErrorResponse = serde_json::from_value(value)
            .map_err(|e| ErrorData::invalid_request(format!("Malformed error response: {}", e)))?;
        return Ok(Message::Error(error));
    }

    Err(ErrorData::invalid_request(
        "JSON-RPC message has neither method, result, nor error",
    ))
}

// A notification that arrived with an id still deserializes as a
// notification; the id is dropped rather than answered (invariant: no
// replies in the notifications/ namespace).
fn strip_id(mut value: Value) -> Result<Notification, serde_json::Error> {
    if let Value::Object(ref mut map) = value {
        map.remove("id");
    }
    serde_json::from_value(value)
}

// Serialization of these types cannot fail: every field is a plain serde
// type with no fallible Serialize impl.
fn to_json(message: &Message) -> Value {
    let value = match message {
        Message::Request(r) => serde_json::to_value(r),
        Message::Notification(n) => serde_json::to_value(n),
        Message::Response(r) => serde_json::to_value(r),
        Message::Error(e) => serde_json::to_value(e),
    };
    value.unwrap_or(Value::Null)
}

/// Encode one message as a minified JSON document.
pub fn encode(message: &Message) -> String {
    to_json(message).to_string()
}

/// Encode a reply batch as a JSON array document.
pub fn encode_batch(messages: &[Message]) -> String {
    Value::Array(messages.iter().map(to_json).collect()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::jsonrpc::RequestId;
    use serde_json::json;

    #[test]
    fn test_parse_single_request() {
        let parsed = parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#);
        assert_eq!(parsed.len(), 1);

        match parsed.into_iter().next().unwrap().unwrap() {
            Message::Request(r) => {
                assert_eq!(r.id, RequestId::Number(1));
                assert_eq!(r.method, "ping");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification_without_id() {
        let parsed = parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(matches!(
            parsed.into_iter().next().unwrap().unwrap(),
            Message::Notification(_)
        ));
    }

    #[test]
    fn test_notifications_namespace_always_notification() {
        // An id on a notifications/ method does not make it a request.
        let parsed = parse(r#"{"jsonrpc":"2.0","id":9,"method":"notifications/initialized"}"#);
        assert!(matches!(
            parsed.into_iter().next().unwrap().unwrap(),
            Message::Notification(_)
        ));
    }

    #[test]
    fn test_parse_response_and_error() {
        let parsed = parse(r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#);
        assert!(matches!(
            parsed.into_iter().next().unwrap().unwrap(),
            Message::Response(_)
        ));

        let parsed = parse(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}"#,
        );
        match parsed.into_iter().next().unwrap().unwrap() {
            Message::Error(e) => assert_eq!(e.error.code, -32601),
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_invalid_json() {
        let parsed = parse("{not json");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].as_ref().unwrap_err().code, ErrorData::PARSE_ERROR);
    }

    #[test]
    fn test_parse_batch_mixed() {
        let frame = r#"[
            {"jsonrpc":"2.0","id":1,"method":"ping"},
            {"jsonrpc":"2.0","method":"notifications/initialized"},
            {"bogus":true},
            42
        ]"#;

        let parsed = parse(frame);
        assert_eq!(parsed.len(), 4);
        assert!(matches!(parsed[0], Ok(Message::Request(_))));
        assert!(matches!(parsed[1], Ok(Message::Notification(_))));
        assert_eq!(
            parsed[2].as_ref().unwrap_err().code,
            ErrorData::INVALID_REQUEST
        );
        assert_eq!(
            parsed[3].as_ref().unwrap_err().code,
            ErrorData::INVALID_REQUEST
        );
    }

    #[test]
    fn test_encode_minified_with_empty_params() {
        let message = Message::Request(Request::new(5, "tools/list"));
        let encoded = encode(&message);

        assert!(!encoded.contains('\n'));
        assert!(encoded.contains(r#""params":{}"#));
        assert!(encoded.contains(r#""jsonrpc":"2.0""#));
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let original = Message::Request(Request::with_params(
            "r-7",
            "tools/call",
            json!({"name": "echo", "arguments": {"text": "hi"}}),
        ));

        let reparsed = parse(&encode(&original))
            .into_iter()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_encode_batch() {
        let batch = vec![
            Message::Response(Response::success(1, json!({}))),
            Message::Response(Response::success(2, json!({}))),
        ];

        let encoded = encode_batch(&batch);
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["id"], 1);
        assert_eq!(value[1]["id"], 2);
    }
}
