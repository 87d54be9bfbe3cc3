//! The HTTP front: a single `/rpc` JSON-RPC endpoint plus `/healthz/live` and
//! `/healthz/ready`, wrapped in the middleware chain from §4.8: panic-catch
//! -> tracing-span -> request-logging -> authentication.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use sophrosyne_core::domain::User;
use sophrosyne_core::error::RpcError;
use sophrosyne_core::health::HealthState;
use sophrosyne_rpc::Router as RpcRouter;
use sophrosyne_store::UserStore;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::auth::{require_bearer_token, AuthState};
use crate::middleware::{catch_panic_layer, log_requests, tracing_span_layer, PanicCounter};

pub struct RpcAppState<Ctx> {
    pub router: Arc<RpcRouter<Ctx>>,
    pub ctx_builder: Box<dyn Fn(Arc<User>, CancellationToken) -> Arc<Ctx> + Send + Sync>,
}

/// Cancels the token it holds when dropped, same idiom as
/// `sophrosyne_cache::TtlCache`'s janitor-shutdown guard. Axum drops a
/// handler's future without polling it to completion when the client
/// disconnects mid-request, so holding this as a handler-local makes that
/// drop the cancellation signal for any in-flight upstream scan RPCs (§4.9).
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn rpc_handler<Ctx: Send + Sync + 'static>(
    State(state): State<Arc<RpcAppState<Ctx>>>,
    Extension(user): Extension<Arc<User>>,
    body: Bytes,
) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = sophrosyne_rpc::JsonRpcResponse::failure(
                serde_json::Value::Null,
                &RpcError::Parse(e.to_string()),
            );
            return (StatusCode::OK, Json(resp)).into_response();
        }
    };

    let cancel = CancellationToken::new();
    let _guard = CancelOnDrop(cancel.clone());

    let ctx = (state.ctx_builder)(user, cancel);
    match state.router.handle_body(value, ctx).await {
        Some(resp) => (StatusCode::OK, Json(resp)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn liveness_handler(State(health): State<Arc<HealthState>>) -> Response {
    match health.liveness().await {
        sophrosyne_core::health::HealthStatus::Up => StatusCode::OK.into_response(),
        sophrosyne_core::health::HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn readiness_handler(State(health): State<Arc<HealthState>>) -> Response {
    let report = health.readiness().await;
    match report.status {
        sophrosyne_core::health::HealthStatus::Up => (StatusCode::OK, Json(report)).into_response(),
        sophrosyne_core::health::HealthStatus::Down => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(axum::http::header::RETRY_AFTER, "5")],
            Json(report),
        )
            .into_response(),
    }
}

pub struct HttpFrontConfig {
    pub body_limit_bytes: usize,
    pub request_timeout: Duration,
}

pub fn build_http_router<Ctx, S>(
    app_state: Arc<RpcAppState<Ctx>>,
    auth_state: Arc<AuthState<S>>,
    health_state: Arc<HealthState>,
    panic_counter: Arc<PanicCounter>,
    config: HttpFrontConfig,
) -> axum::Router
where
    Ctx: Send + Sync + 'static,
    S: UserStore + 'static,
{
    let rpc_routes = axum::Router::new()
        .route("/rpc", post(rpc_handler::<Ctx>))
        .with_state(app_state)
        .route_layer(axum::middleware::from_fn_with_state(
            auth_state,
            require_bearer_token::<S>,
        ));

    let health_routes = axum::Router::new()
        .route("/healthz/live", get(liveness_handler))
        .route("/healthz/ready", get(readiness_handler))
        .with_state(health_state);

    axum::Router::new()
        .merge(rpc_routes)
        .merge(health_routes)
        .layer(axum::middleware::from_fn(log_requests))
        .layer(tracing_span_layer::<axum::body::Body>())
        .layer(catch_panic_layer(panic_counter))
        .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
        .layer(TimeoutLayer::new(config.request_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State as AxumState;
    use sophrosyne_core::health::HealthIndicator;

    struct AlwaysDown;
    #[async_trait::async_trait]
    impl HealthIndicator for AlwaysDown {
        fn name(&self) -> &str {
            "always-down"
        }
        async fn check(&self) -> Result<(), String> {
            Err("nope".to_string())
        }
    }

    #[tokio::test]
    async fn readiness_handler_sets_retry_after_when_down() {
        let health = Arc::new(HealthState::new(vec![Arc::new(AlwaysDown)], None));
        let response = readiness_handler(AxumState(health)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(axum::http::header::RETRY_AFTER).unwrap(), "5");
    }
}
