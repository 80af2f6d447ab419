//! In-process identity store.
//!
//! Accounts live in insertion order behind a single `RwLock`, with an
//! identity index beside them. Each trait method takes the lock once, so
//! every operation is atomic with respect to the others.

use crate::error::LedgerError;
use crate::models::{Account, Identity};
use crate::services::store::IdentityStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    next_id: i64,
    accounts: Vec<Account>,
    index: HashMap<Identity, usize>,
}

impl State {
    fn position(&self, identity: Identity) -> Option<usize> {
        self.index.get(&identity).copied()
    }

    fn insert(&mut self, identity: Identity, alias: Option<String>, balance: i64) -> Account {
        self.next_id += 1;
        let now = Utc::now();
        let account = Account {
            id: self.next_id,
            identity,
            alias,
            balance,
            created_utc: now,
            updated_utc: now,
        };
        self.index.insert(identity, self.accounts.len());
        self.accounts.push(account.clone());
        account
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn upsert_alias(&self, identity: Identity, alias: &str) -> Result<Account, LedgerError> {
        let mut state = self.state.write().await;
        match state.position(identity) {
            Some(idx) => {
                let account = &mut state.accounts[idx];
                account.alias = Some(alias.to_string());
                account.updated_utc = Utc::now();
                Ok(account.clone())
            }
            None => Ok(state.insert(identity, Some(alias.to_string()), 0)),
        }
    }

    async fn get_account(&self, identity: Identity) -> Result<Option<Account>, LedgerError> {
        let state = self.state.read().await;
        Ok(state.position(identity).map(|idx| state.accounts[idx].clone()))
    }

    async fn increment_balance(
        &self,
        identity: Identity,
        delta: i64,
    ) -> Result<Account, LedgerError> {
        let mut state = self.state.write().await;
        match state.position(identity) {
            Some(idx) => {
                let account = &mut state.accounts[idx];
                account.balance = account.balance.checked_add(delta).ok_or_else(|| {
                    LedgerError::InvalidArgument("balance out of range".to_string())
                })?;
                account.updated_utc = Utc::now();
                Ok(account.clone())
            }
            None => Ok(state.insert(identity, None, delta)),
        }
    }

    async fn set_balance(&self, identity: Identity, value: i64) -> Result<Account, LedgerError> {
        let mut state = self.state.write().await;
        match state.position(identity) {
            Some(idx) => {
                let account = &mut state.accounts[idx];
                account.balance = value;
                account.updated_utc = Utc::now();
                Ok(account.clone())
            }
            None => Ok(state.insert(identity, None, value)),
        }
    }

    async fn top_n(&self, limit: u32) -> Result<Vec<Account>, LedgerError> {
        let state = self.state.read().await;
        let mut ranked = state.accounts.clone();
        // Stable sort keeps insertion order among equal balances.
        ranked.sort_by(|a, b| b.balance.cmp(&a.balance));
        ranked.truncate(limit as usize);
        Ok(ranked)
    }

    async fn clear_all(&self) -> Result<u64, LedgerError> {
        let mut state = self.state.write().await;
        let removed = state.accounts.len() as u64;
        state.accounts.clear();
        state.index.clear();
        Ok(removed)
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}
