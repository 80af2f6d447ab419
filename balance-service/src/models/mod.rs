//! Domain models for balance-service.

mod account;

pub use account::{validate_alias, Account, Identity, MAX_ALIAS_LEN};
