//! The gRPC-native front: standard health checking (`grpc.health.v1.Health`)
//! and reflection, with the same bearer-token auth semantics as the HTTP
//! front (carried in the `authorization` metadata entry instead of a
//! header). Grounded on the guard shape in `r2e_grpc::guard::GrpcGuardContext`,
//! replacing JWT-claims identity with this spec's `User` principal.

use std::sync::Arc;

use sophrosyne_core::domain::User;
use sophrosyne_core::error::RpcError;
use sophrosyne_store::UserStore;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

/// Map a domain `RpcError` onto the `tonic::Status` code the gRPC front
/// returns for the same failure the JSON-RPC front reports via §7's error
/// codes.
pub fn rpc_error_to_status(err: RpcError) -> Status {
    if err.is_internal() {
        tracing::error!(%err, "internal error while handling grpc request");
        return Status::internal("internal error");
    }
    match err {
        RpcError::Parse(msg) => Status::invalid_argument(msg),
        RpcError::InvalidRequest(msg) => Status::invalid_argument(msg),
        RpcError::MethodNotFound(method) => Status::unimplemented(method),
        RpcError::InvalidParams(msg) => Status::invalid_argument(msg),
        RpcError::UniqueViolation { column } => {
            Status::already_exists(format!("unique violation: {column}"))
        }
        RpcError::Unauthorized => Status::permission_denied("unauthorized"),
        RpcError::NotFound(what) => Status::not_found(what),
        RpcError::InvalidCursor => Status::invalid_argument("invalid cursor"),
        RpcError::Internal(_) => unreachable!("handled above"),
    }
}

/// Extract and verify the bearer token carried in gRPC request metadata,
/// returning the authenticated (token-zeroed) principal.
pub async fn authenticate_grpc<S: UserStore>(
    metadata: &MetadataMap,
    store: &S,
    site_key: &[u8],
    salt: &[u8],
) -> Result<User, Status> {
    let header = metadata
        .get("authorization")
        .ok_or_else(|| Status::unauthenticated("missing authorization metadata"))?;
    let header = header
        .to_str()
        .map_err(|_| Status::unauthenticated("invalid authorization metadata"))?;
    let encoded = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| Status::unauthenticated("expected Bearer token"))?;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    let raw_token = STANDARD
        .decode(encoded.trim())
        .map_err(|_| Status::unauthenticated("malformed token"))?;

    let protected = sophrosyne_core::token::protect(&raw_token, site_key, salt);
    let mut user = store
        .get_by_protected_token(&protected)
        .await
        .map_err(|_| Status::unauthenticated("unknown token"))?;
    user.protected_token.iter_mut().for_each(|b| *b = 0);
    Ok(user)
}

/// Convenience wrapper pulling the principal off an already-built `Request<T>`.
pub async fn authenticate_request<T, S: UserStore>(
    request: &Request<T>,
    store: &S,
    site_key: &[u8],
    salt: &[u8],
) -> Result<User, Status> {
    authenticate_grpc(request.metadata(), store, site_key, salt).await
}

/// Build the standard health + reflection gRPC services, returning the
/// reporter so callers can flip service status as readiness changes.
pub fn standard_services() -> (
    tonic_health::server::HealthReporter,
    tonic_health::pb::health_server::HealthServer<impl tonic_health::pb::health_server::Health>,
    tonic_reflection::server::v1::ServerReflectionServer<
        impl tonic_reflection::server::v1::ServerReflection,
    >,
) {
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("static health descriptor set always builds");
    (health_reporter, health_service, reflection_service)
}

/// Shared panic counter threshold indicator, reported under `/healthz/ready`
/// once wired into a `sophrosyne_core::health::HealthState`. Kept here (not
/// `sophrosyne-core`) since the panic counter itself lives in this crate's
/// middleware module.
pub struct PanicThresholdIndicator {
    pub counter: Arc<crate::middleware::PanicCounter>,
    pub threshold: u64,
}

#[async_trait::async_trait]
impl sophrosyne_core::health::HealthIndicator for PanicThresholdIndicator {
    fn name(&self) -> &str {
        "panics"
    }

    async fn check(&self) -> Result<(), String> {
        let count = self.counter.count();
        if count >= self.threshold {
            Err(format!("panic count {count} reached threshold {}", self.threshold))
        } else {
            Ok(())
        }
    }

    fn affects_readiness(&self) -> bool {
        false
    }
}
