//! gRPC module for balance-service.

pub mod capability_check;
mod service;

pub use capability_check::{
    AdminListOracle, CallerMetadata, FixedOracle, PermissionOracle, TrustedHeaderOracle,
};
pub use service::BalanceServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("micros.balance.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("balance_descriptor");
}
