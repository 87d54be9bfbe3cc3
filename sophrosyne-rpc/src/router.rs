//! Dispatch table mapping JSON-RPC methods to handler functions, plus batch
//! handling (C6). Deliberately a plain `HashMap` lookup rather than any
//! reflection/macro-driven registration — the only place this router departs
//! from a straight data structure is the params-decode boundary, which is
//! where `garde` validation runs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sophrosyne_core::error::RpcError;

use crate::envelope::{normalize_id, parse_request};
use crate::response::JsonRpcResponse;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, RpcError>> + Send>>;

/// Implemented by every registered RPC method. `Ctx` is whatever
/// request-scoped context the handler needs (typically the authenticated
/// principal plus handles to the stores/scan engine).
pub trait Handler<Ctx>: Send + Sync {
    fn call(&self, params: Option<serde_json::Value>, ctx: Arc<Ctx>) -> HandlerFuture;
}

impl<Ctx, F, Fut> Handler<Ctx> for F
where
    F: Fn(Option<serde_json::Value>, Arc<Ctx>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, RpcError>> + Send + 'static,
{
    fn call(&self, params: Option<serde_json::Value>, ctx: Arc<Ctx>) -> HandlerFuture {
        Box::pin(self(params, ctx))
    }
}

pub struct Router<Ctx> {
    handlers: HashMap<String, Arc<dyn Handler<Ctx>>>,
}

impl<Ctx> Default for Router<Ctx> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<Ctx> Router<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: impl Handler<Ctx> + 'static) {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    async fn dispatch_single(
        &self,
        raw: &serde_json::Value,
        ctx: Arc<Ctx>,
    ) -> Option<JsonRpcResponse> {
        let parsed = match parse_request(raw) {
            Ok(p) => p,
            Err(e) => return Some(JsonRpcResponse::failure(normalize_id(raw.get("id").cloned()), &e)),
        };

        let handler = match self.handlers.get(&parsed.method) {
            Some(h) => h.clone(),
            None => {
                let err = RpcError::MethodNotFound(parsed.method.clone());
                return if parsed.is_notification {
                    None
                } else {
                    Some(JsonRpcResponse::failure(normalize_id(parsed.id), &err))
                };
            }
        };

        let result = handler.call(parsed.params, ctx).await;
        if parsed.is_notification {
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(normalize_id(parsed.id), value),
            Err(e) => JsonRpcResponse::failure(normalize_id(parsed.id), &e),
        })
    }

    /// Handle a request body that may be a single request object or a batch
    /// array. Returns `None` when nothing should be written to the wire —
    /// either every element was a notification, or the whole batch was
    /// empty-after-filtering.
    pub async fn handle_body(
        &self,
        body: serde_json::Value,
        ctx: Arc<Ctx>,
    ) -> Option<serde_json::Value> {
        match body {
            serde_json::Value::Array(items) => {
                if items.is_empty() {
                    let err = RpcError::InvalidRequest("batch must not be empty".into());
                    let resp = JsonRpcResponse::failure(serde_json::Value::Null, &err);
                    return Some(serde_json::to_value(resp).expect("response always serializes"));
                }
                let mut responses = Vec::new();
                for item in items {
                    if let Some(resp) = self.dispatch_single(&item, ctx.clone()).await {
                        responses.push(serde_json::to_value(resp).expect("response always serializes"));
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(serde_json::Value::Array(responses))
                }
            }
            single => self
                .dispatch_single(&single, ctx)
                .await
                .map(|resp| serde_json::to_value(resp).expect("response always serializes")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Ctx;

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let router: Router<Ctx> = Router::new();
        let body = json!({"jsonrpc": "2.0", "method": "nope", "id": 1});
        let resp = router.handle_body(body, Arc::new(Ctx)).await.unwrap();
        assert_eq!(resp["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notification_produces_no_response_even_on_error() {
        let router: Router<Ctx> = Router::new();
        let body = json!({"jsonrpc": "2.0", "method": "nope"});
        let resp = router.handle_body(body, Arc::new(Ctx)).await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn registered_method_dispatches_and_echoes_string_id() {
        let mut router: Router<Ctx> = Router::new();
        router.register("ping", |_params, _ctx: Arc<Ctx>| async move {
            Ok(json!({"pong": true}))
        });
        let body = json!({"jsonrpc": "2.0", "method": "ping", "id": 7});
        let resp = router.handle_body(body, Arc::new(Ctx)).await.unwrap();
        assert_eq!(resp["result"]["pong"], true);
        assert_eq!(resp["id"], "7");
    }

    #[tokio::test]
    async fn batch_of_all_notifications_yields_no_body() {
        let mut router: Router<Ctx> = Router::new();
        router.register("ping", |_params, _ctx: Arc<Ctx>| async move { Ok(json!(null)) });
        let body = json!([
            {"jsonrpc": "2.0", "method": "ping"},
            {"jsonrpc": "2.0", "method": "ping"}
        ]);
        let resp = router.handle_body(body, Arc::new(Ctx)).await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn empty_batch_is_an_invalid_request_error() {
        let router: Router<Ctx> = Router::new();
        let resp = router.handle_body(json!([]), Arc::new(Ctx)).await.unwrap();
        assert_eq!(resp["error"]["code"], -32600);
    }
}
