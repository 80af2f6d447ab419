//! gRPC utilities shared by service servers.

pub mod interceptors;

pub use interceptors::{REQUEST_ID_KEY, extract_request_id, trace_context_interceptor};
