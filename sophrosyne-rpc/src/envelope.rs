//! JSON-RPC 2.0 envelope parsing (C6).

use sophrosyne_core::error::RpcError;

pub struct ParsedRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    /// `true` when the envelope had no `id` key at all — a notification,
    /// which never produces a response, even on error.
    pub is_notification: bool,
    pub id: Option<serde_json::Value>,
}

/// Parse a single JSON-RPC request object. Does not handle batching — see
/// [`crate::router::Router::handle_body`].
pub fn parse_request(value: &serde_json::Value) -> Result<ParsedRequest, RpcError> {
    let obj = value
        .as_object()
        .ok_or_else(|| RpcError::InvalidRequest("request must be a JSON object".into()))?;

    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::InvalidRequest("missing \"jsonrpc\"".into()))?;
    if jsonrpc != "2.0" {
        return Err(RpcError::InvalidRequest("\"jsonrpc\" must be \"2.0\"".into()));
    }

    let method = obj
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::InvalidRequest("missing \"method\"".into()))?;
    if method.is_empty() {
        return Err(RpcError::InvalidRequest("\"method\" must not be empty".into()));
    }
    if method.starts_with("rpc.") {
        return Err(RpcError::InvalidRequest(
            "\"method\" names starting with \"rpc.\" are reserved".into(),
        ));
    }

    if let Some(params) = obj.get("params") {
        if !params.is_object() && !params.is_array() {
            return Err(RpcError::InvalidRequest(
                "\"params\" must be an object or array".into(),
            ));
        }
    }

    Ok(ParsedRequest {
        method: method.to_string(),
        params: obj.get("params").cloned(),
        is_notification: !obj.contains_key("id"),
        id: obj.get("id").cloned(),
    })
}

/// `id` is echoed back normalized to a string, per this repo's convention —
/// numeric and null ids (null = request with no correlation id desired) are
/// both representable as a string on the wire without ambiguity.
pub fn normalize_id(id: Option<serde_json::Value>) -> serde_json::Value {
    match id {
        None | Some(serde_json::Value::Null) => serde_json::Value::Null,
        Some(serde_json::Value::String(s)) => serde_json::Value::String(s),
        Some(other) => serde_json::Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_id_is_a_notification() {
        let parsed = parse_request(&json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        assert!(parsed.is_notification);
    }

    #[test]
    fn explicit_null_id_is_not_a_notification() {
        let parsed = parse_request(&json!({"jsonrpc": "2.0", "method": "ping", "id": null})).unwrap();
        assert!(!parsed.is_notification);
    }

    #[test]
    fn rejects_wrong_jsonrpc_version() {
        let result = parse_request(&json!({"jsonrpc": "1.0", "method": "ping", "id": 1}));
        assert!(matches!(result, Err(RpcError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_reserved_method_prefix() {
        let result = parse_request(&json!({"jsonrpc": "2.0", "method": "rpc.internal", "id": 1}));
        assert!(matches!(result, Err(RpcError::InvalidRequest(_))));
    }

    #[test]
    fn numeric_id_normalizes_to_string() {
        assert_eq!(normalize_id(Some(json!(42))), json!("42"));
    }
}
