//! Account model: one row per linked chat identity.

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Maximum alias length in characters.
pub const MAX_ALIAS_LEN: usize = 64;

/// External chat-platform user id.
///
/// Platform ids are positive 64-bit integers. Parsing accepts the bare
/// number as well as the mention forms `<@123>` and `<@!123>`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Identity(i64);

impl Identity {
    /// Build an identity from a raw platform id.
    pub fn new(raw: i64) -> Result<Self, LedgerError> {
        if raw <= 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "identity must be a positive integer, got {}",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for Identity {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("<@")
            .and_then(|rest| rest.strip_suffix('>'))
            .map(|inner| inner.strip_prefix('!').unwrap_or(inner))
            .unwrap_or(trimmed);

        let raw = digits.parse::<i64>().map_err(|_| {
            LedgerError::InvalidArgument(format!("malformed identity '{}'", trimmed))
        })?;
        Self::new(raw)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted account record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Account {
    /// Storage insertion sequence; breaks ranking ties.
    pub id: i64,
    pub identity: Identity,
    pub alias: Option<String>,
    pub balance: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    /// Check if the account has been linked to an alias.
    pub fn is_linked(&self) -> bool {
        self.alias.is_some()
    }
}

/// Normalize and validate an alias.
pub fn validate_alias(alias: &str) -> Result<String, LedgerError> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Err(LedgerError::InvalidArgument(
            "alias must not be empty".to_string(),
        ));
    }
    if alias.chars().count() > MAX_ALIAS_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "alias must be at most {} characters",
            MAX_ALIAS_LEN
        )));
    }
    Ok(alias.to_string())
}
