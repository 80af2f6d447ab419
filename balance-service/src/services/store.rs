//! Identity store abstraction.
//!
//! Every method maps to a single atomic operation at the storage layer.
//! Callers never read a balance and write it back; concurrent increments on
//! the same identity must compose without lost updates.

use crate::error::LedgerError;
use crate::models::{Account, Identity};
use async_trait::async_trait;

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create the account with balance 0, or overwrite only the alias.
    async fn upsert_alias(&self, identity: Identity, alias: &str) -> Result<Account, LedgerError>;

    /// Point lookup.
    async fn get_account(&self, identity: Identity) -> Result<Option<Account>, LedgerError>;

    /// Add `delta` to the balance, creating the account with `balance = delta`
    /// when absent.
    async fn increment_balance(&self, identity: Identity, delta: i64)
        -> Result<Account, LedgerError>;

    /// Overwrite the balance, creating the account when absent. Alias is
    /// left untouched.
    async fn set_balance(&self, identity: Identity, value: i64) -> Result<Account, LedgerError>;

    /// Up to `limit` accounts, highest balance first, ties in insertion order.
    async fn top_n(&self, limit: u32) -> Result<Vec<Account>, LedgerError>;

    /// Remove every account. Returns the number removed.
    async fn clear_all(&self) -> Result<u64, LedgerError>;

    /// Verify the store is reachable.
    async fn health_check(&self) -> Result<(), LedgerError>;
}
