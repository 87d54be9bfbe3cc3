//! Error kinds and their mapping onto JSON-RPC 2.0 error codes.

use std::fmt;

/// RFC-defined and implementation-defined JSON-RPC error codes (§7).
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const UNAUTHORIZED: i64 = 12345;
    pub const NOT_FOUND: i64 = 12346;
    pub const INVALID_CURSOR: i64 = 12347;
}

/// Domain-level error kind, independent of the JSON-RPC wire format.
///
/// Bridging code (`sophrosyne-rpc`) maps each variant onto a `(code, message,
/// data)` triple. Kept deliberately flat — mirrors the teacher's `AppError`
/// shape rather than a nested `thiserror` hierarchy per module.
#[derive(Debug)]
pub enum RpcError {
    /// Request body failed to parse as JSON.
    Parse(String),
    /// Envelope is structurally invalid (bad `jsonrpc`, empty method, ...).
    InvalidRequest(String),
    /// No handler registered for the method/service named.
    MethodNotFound(String),
    /// Params failed validation or didn't decode into the handler's type.
    InvalidParams(String),
    /// A unique-column constraint was violated; `column` names the offender.
    UniqueViolation { column: String },
    /// Authenticated principal is not permitted to perform the action.
    Unauthorized,
    /// Referenced entity does not exist (or is soft-deleted).
    NotFound(String),
    /// Pagination cursor failed to decode, or named a different owner.
    InvalidCursor,
    /// Anything else — logged at `error` level, never echoed to the caller.
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => codes::PARSE_ERROR,
            RpcError::InvalidRequest(_) => codes::INVALID_REQUEST,
            RpcError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) | RpcError::UniqueViolation { .. } => codes::INVALID_PARAMS,
            RpcError::Unauthorized => codes::UNAUTHORIZED,
            RpcError::NotFound(_) => codes::NOT_FOUND,
            RpcError::InvalidCursor => codes::INVALID_CURSOR,
            RpcError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// The message sent to the caller. Never includes internal error detail.
    pub fn message(&self) -> String {
        match self {
            RpcError::Parse(_) => "Parse error".to_string(),
            RpcError::InvalidRequest(msg) => format!("Invalid Request: {msg}"),
            RpcError::MethodNotFound(method) => format!("Method not found: {method}"),
            RpcError::InvalidParams(msg) => format!("Invalid params: {msg}"),
            RpcError::UniqueViolation { column } => format!("Unique violation: {column}"),
            RpcError::Unauthorized => "Unauthorized".to_string(),
            RpcError::NotFound(_) => "Not found".to_string(),
            RpcError::InvalidCursor => "Invalid cursor".to_string(),
            RpcError::Internal(_) => "Internal error".to_string(),
        }
    }

    /// Structured `data` payload, if any, attached to the JSON-RPC error object.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            RpcError::UniqueViolation { column } => Some(serde_json::json!({ "column": column })),
            _ => None,
        }
    }

    /// True if this error must never cross the wire verbatim — callers should
    /// `tracing::error!` the detail and return the generic internal message.
    pub fn is_internal(&self) -> bool {
        matches!(self, RpcError::Internal(_))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Parse(msg) => write!(f, "parse error: {msg}"),
            RpcError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            RpcError::MethodNotFound(method) => write!(f, "method not found: {method}"),
            RpcError::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            RpcError::UniqueViolation { column } => write!(f, "unique violation on {column}"),
            RpcError::Unauthorized => write!(f, "unauthorized"),
            RpcError::NotFound(what) => write!(f, "not found: {what}"),
            RpcError::InvalidCursor => write!(f, "invalid cursor"),
            RpcError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_found_maps_to_rfc_code() {
        let err = RpcError::MethodNotFound("users.foo".into());
        assert_eq!(err.code(), codes::METHOD_NOT_FOUND);
        assert!(err.message().contains("users.foo"));
    }

    #[test]
    fn unique_violation_carries_column_data() {
        let err = RpcError::UniqueViolation { column: "email".into() };
        assert_eq!(err.code(), codes::INVALID_PARAMS);
        let data = err.data().unwrap();
        assert_eq!(data["column"], "email");
    }

    #[test]
    fn internal_errors_never_leak_detail() {
        let err = RpcError::Internal("leaked stack trace".into());
        assert!(err.is_internal());
        assert_eq!(err.message(), "Internal error");
        assert!(!err.message().contains("leaked"));
    }

    #[test]
    fn implementation_defined_codes_match_spec() {
        assert_eq!(RpcError::Unauthorized.code(), 12345);
        assert_eq!(RpcError::NotFound("x".into()).code(), 12346);
        assert_eq!(RpcError::InvalidCursor.code(), 12347);
    }
}
