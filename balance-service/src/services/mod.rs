//! Services module for balance-service.

pub mod database;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod role_grant;
pub mod store;

pub use database::Database;
pub use ledger::{
    BalanceView, Caller, Ledger, LinkOutcome, Operation, RoleOutcome, TOP_BALANCES_LIMIT,
};
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use role_grant::{DisabledRoleGrant, HttpRoleGrant, RoleGrant, RoleGrantError};
pub use store::IdentityStore;
