//! Error taxonomy for ledger operations.
//!
//! | LedgerError | gRPC Status |
//! |-------------|-------------|
//! | `NotFound` | `NOT_FOUND` |
//! | `Unauthorized` | `PERMISSION_DENIED` |
//! | `InvalidArgument` | `INVALID_ARGUMENT` |
//! | `StoreUnavailable` | `UNAVAILABLE` |

use crate::models::Identity;
use thiserror::Error;
use tonic::Status;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Account not linked: {0}")]
    NotFound(Identity),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage transport failure. The inner error is logged, never returned
    /// to callers.
    #[error("Storage unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl LedgerError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Unauthorized(_) => "unauthorized",
            LedgerError::InvalidArgument(_) => "invalid_argument",
            LedgerError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

/// SQLSTATE for `numeric_value_out_of_range`.
const NUMERIC_OUT_OF_RANGE: &str = "22003";

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err)
                if db_err.code().as_deref() == Some(NUMERIC_OUT_OF_RANGE) =>
            {
                LedgerError::InvalidArgument("balance out of range".to_string())
            }
            other => LedgerError::StoreUnavailable(anyhow::Error::new(other)),
        }
    }
}

impl From<LedgerError> for Status {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(identity) => {
                Status::not_found(format!("Account {} is not linked", identity))
            }
            LedgerError::Unauthorized(msg) => Status::permission_denied(msg),
            LedgerError::InvalidArgument(msg) => Status::invalid_argument(msg),
            LedgerError::StoreUnavailable(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %err, "Storage error");
                Status::unavailable("Storage unavailable")
            }
        }
    }
}
