//! JSON-RPC 2.0 response envelope (C6). Carries `result` XOR `error`; if
//! neither is supplied, `result` defaults to `null`.

use serde::ser::SerializeStruct;
use serde::Serialize;
use sophrosyne_core::error::RpcError;

pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl Serialize for JsonRpcErrorObject {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let field_count = if self.data.is_some() { 3 } else { 2 };
        let mut state = serializer.serialize_struct("JsonRpcErrorObject", field_count)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(data) = &self.data {
            state.serialize_field("data", data)?;
        }
        state.end()
    }
}

pub enum Outcome {
    Result(serde_json::Value),
    Error(JsonRpcErrorObject),
}

pub struct JsonRpcResponse {
    pub outcome: Outcome,
    pub id: serde_json::Value,
}

impl JsonRpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            outcome: Outcome::Result(result),
            id,
        }
    }

    pub fn failure(id: serde_json::Value, error: &RpcError) -> Self {
        if error.is_internal() {
            tracing::error!(%error, "internal error while handling rpc request");
        }
        Self {
            outcome: Outcome::Error(JsonRpcErrorObject {
                code: error.code(),
                message: error.message(),
                data: error.data(),
            }),
            id,
        }
    }
}

impl Serialize for JsonRpcResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("JsonRpcResponse", 3)?;
        state.serialize_field("jsonrpc", "2.0")?;
        match &self.outcome {
            Outcome::Result(value) => state.serialize_field("result", value)?,
            Outcome::Error(err) => state.serialize_field("error", err)?,
        }
        state.serialize_field("id", &self.id)?;
        state.end()
    }
}

/// A conformant JSON-RPC client is free to render a mathematically-integral
/// number as a float (`20.0` instead of `20`). `serde_json::Value`'s own
/// `Number` type tags the two representations separately, and an integer
/// field's `Deserialize` impl rejects the float-tagged variant even when the
/// value is whole. Walk the tree and fold any such float back into an
/// integer before decoding so callers don't have to care which one a client
/// sent.
fn coerce_integral_floats(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Number(n) => {
            if n.is_f64() {
                let f = n.as_f64().expect("is_f64 implies as_f64");
                if f.is_finite() && f.fract() == 0.0 && f as i64 as f64 == f {
                    *n = serde_json::Number::from(f as i64);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                coerce_integral_floats(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                coerce_integral_floats(v);
            }
        }
        _ => {}
    }
}

/// Decode `params` into `T`, running its `garde` validation. Used by every
/// handler at the params boundary so business logic never sees a malformed
/// or semantically-invalid request.
pub fn params_into<T>(params: Option<serde_json::Value>) -> Result<T, RpcError>
where
    T: serde::de::DeserializeOwned + garde::Validate<Context = ()>,
{
    let mut value = params.unwrap_or(serde_json::Value::Null);
    coerce_integral_floats(&mut value);
    let decoded: T =
        serde_json::from_value(value).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
    decoded
        .validate()
        .map_err(|report| RpcError::InvalidParams(report.to_string()))?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_response_serializes_without_error_field() {
        let resp = JsonRpcResponse::success(json!("1"), json!({"ok": true}));
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("result").is_some());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failure_response_serializes_without_result_field() {
        let resp = JsonRpcResponse::failure(json!("1"), &RpcError::Unauthorized);
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("error").is_some());
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], 12345);
    }

    #[test]
    fn unique_violation_carries_column_data_in_wire_format() {
        let resp = JsonRpcResponse::failure(
            json!("1"),
            &RpcError::UniqueViolation { column: "email".into() },
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["data"]["column"], "email");
    }

    #[derive(Debug, serde::Deserialize, garde::Validate)]
    struct PageSizeParams {
        #[garde(range(min = 1, max = 500))]
        page_size: u32,
    }

    #[test]
    fn params_into_accepts_integral_floats_for_integer_fields() {
        let params = json!({"page_size": 20.0});
        let decoded: PageSizeParams = params_into(Some(params)).unwrap();
        assert_eq!(decoded.page_size, 20);
    }

    #[test]
    fn params_into_still_rejects_fractional_floats_for_integer_fields() {
        let params = json!({"page_size": 20.5});
        assert!(params_into::<PageSizeParams>(Some(params)).is_err());
    }
}
