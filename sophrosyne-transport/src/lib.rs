pub mod auth;
pub mod grpc;
pub mod http;
pub mod middleware;
pub mod multiplex;
pub mod serve;
pub mod tls;

pub use auth::{require_bearer_token, AuthState};
pub use grpc::{
    authenticate_grpc, authenticate_request, rpc_error_to_status, standard_services,
    PanicThresholdIndicator,
};
pub use http::{build_http_router, HttpFrontConfig, RpcAppState};
pub use middleware::PanicCounter;
pub use multiplex::MultiplexService;
pub use serve::serve;
pub use tls::{build_server_config, generate_dev_cert, load_cert_from_disk, DevKeyType};
