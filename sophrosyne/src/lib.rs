pub mod app;
pub mod grpc_services;
pub mod handlers;
pub mod healthcheck;
