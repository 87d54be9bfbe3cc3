//! Generated server bindings for the gateway's own `UserService`,
//! `ProfileService`, `CheckService`, and `ScanService` (§6), built via
//! `tonic-build` the same way `sophrosyne-checkproto` compiles the upstream
//! contract.

tonic::include_proto!("gatewayproto");
