//! JSON-RPC 2.0 de-multiplexing: envelope parsing, the method dispatch
//! table, and batch handling (C6).

pub mod envelope;
pub mod response;
pub mod router;

pub use envelope::{normalize_id, parse_request, ParsedRequest};
pub use response::{params_into, JsonRpcErrorObject, JsonRpcResponse};
pub use router::{Handler, HandlerFuture, Router};
