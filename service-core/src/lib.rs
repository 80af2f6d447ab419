//! service-core: Shared infrastructure for the balance service.
pub mod config;
pub mod error;
pub mod grpc;
pub mod middleware;
pub mod observability;

pub use axum;
pub use tonic;
pub use tracing;
