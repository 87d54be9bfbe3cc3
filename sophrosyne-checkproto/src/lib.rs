//! Generated client bindings for the upstream `CheckService` contract,
//! built via `tonic-build` the same way as `examples/example-grpc`'s
//! `build.rs` wires up its own `.proto` file.

tonic::include_proto!("checkproto");
