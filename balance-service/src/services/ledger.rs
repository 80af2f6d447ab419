//! Ledger service: authorization-gated operations over the identity store.
//!
//! Every operation receives a [`Caller`] whose privilege has already been
//! resolved by a permission oracle. Authorization is checked first, then
//! arguments, and only then is the store touched.

use crate::error::LedgerError;
use crate::models::{validate_alias, Account, Identity};
use crate::services::metrics::{record_error, record_ledger_operation};
use crate::services::role_grant::{RoleGrant, RoleGrantError};
use crate::services::store::IdentityStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Number of accounts returned by [`Ledger::top_balances`].
pub const TOP_BALANCES_LIMIT: u32 = 20;

/// The identity issuing a command and whether it is privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub identity: Identity,
    pub privileged: bool,
}

impl Caller {
    pub fn new(identity: Identity, privileged: bool) -> Self {
        Self {
            identity,
            privileged,
        }
    }

    /// Fail with `Unauthorized` unless the caller may perform `operation`.
    pub fn authorize(&self, operation: Operation) -> Result<(), LedgerError> {
        if self.privileged || !operation.requires_privilege() {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(operation.denial()))
        }
    }
}

/// Ledger operations, for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Link,
    ReadOwnBalance,
    ReadOtherBalance,
    TopBalances,
    Credit,
    Debit,
    SetBalance,
    ResetAccounts,
}

impl Operation {
    pub fn requires_privilege(self) -> bool {
        !matches!(self, Operation::Link | Operation::ReadOwnBalance)
    }

    /// Label used for `balance_ledger_operations_total`.
    pub fn metric_name(self) -> &'static str {
        match self {
            Operation::Link => "link",
            Operation::ReadOwnBalance | Operation::ReadOtherBalance => "get_balance",
            Operation::TopBalances => "top_balances",
            Operation::Credit => "credit",
            Operation::Debit => "debit",
            Operation::SetBalance => "set_balance",
            Operation::ResetAccounts => "reset_accounts",
        }
    }

    fn denial(self) -> &'static str {
        match self {
            Operation::Link | Operation::ReadOwnBalance => "operation not permitted",
            Operation::ReadOtherBalance => "only privileged callers can read other balances",
            Operation::TopBalances => "only privileged callers can list balances",
            Operation::Credit => "only privileged callers can credit balances",
            Operation::Debit => "only privileged callers can debit balances",
            Operation::SetBalance => "only privileged callers can set balances",
            Operation::ResetAccounts => "only privileged callers can reset accounts",
        }
    }
}

/// Result of the role grant attached to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutcome {
    NotRequested,
    Granted(String),
    RoleNotFound(String),
    Failed { role: String, reason: String },
}

impl RoleOutcome {
    pub fn role_name(&self) -> Option<&str> {
        match self {
            RoleOutcome::NotRequested => None,
            RoleOutcome::Granted(role) | RoleOutcome::RoleNotFound(role) => Some(role),
            RoleOutcome::Failed { role, .. } => Some(role),
        }
    }
}

/// Outcome of [`Ledger::link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    pub account: Account,
    pub role: RoleOutcome,
}

impl LinkOutcome {
    /// The link was stored but the requested role was not granted.
    pub fn is_partial(&self) -> bool {
        matches!(
            self.role,
            RoleOutcome::RoleNotFound(_) | RoleOutcome::Failed { .. }
        )
    }
}

/// Outcome of [`Ledger::get_balance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceView {
    pub account: Account,
    /// The caller read their own account.
    pub is_self: bool,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn IdentityStore>,
    roles: Arc<dyn RoleGrant>,
}

impl Ledger {
    pub fn new(store: Arc<dyn IdentityStore>, roles: Arc<dyn RoleGrant>) -> Self {
        Self { store, roles }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Authorization gate for callers that validate arguments themselves
    /// before reaching an operation. Denials are counted like any other
    /// failed operation.
    pub fn authorize(&self, caller: &Caller, operation: Operation) -> Result<(), LedgerError> {
        track(operation.metric_name(), caller.authorize(operation))
    }

    /// Link `target` to `alias`. Open to any caller.
    ///
    /// Creates the account at balance 0 if absent, otherwise only the alias
    /// changes. A requested role is granted afterwards; its failure is
    /// reported in the outcome and never rolls back the link.
    #[instrument(skip(self, alias), fields(caller = %caller.identity, target = %target))]
    pub async fn link(
        &self,
        caller: &Caller,
        target: Identity,
        alias: &str,
        role_name: Option<&str>,
    ) -> Result<LinkOutcome, LedgerError> {
        let result: Result<LinkOutcome, LedgerError> = async {
            caller.authorize(Operation::Link)?;
            let alias = validate_alias(alias)?;
            let account = self.store.upsert_alias(target, &alias).await?;

            let role = match role_name.map(str::trim).filter(|r| !r.is_empty()) {
                None => RoleOutcome::NotRequested,
                Some(role) => match self.roles.grant_role(target, role).await {
                    Ok(()) => RoleOutcome::Granted(role.to_string()),
                    Err(RoleGrantError::NotFound(_)) => {
                        warn!(role = role, "Role not found, link kept without role");
                        RoleOutcome::RoleNotFound(role.to_string())
                    }
                    Err(RoleGrantError::Unavailable(reason)) => {
                        warn!(role = role, reason = %reason, "Role grant failed, link kept without role");
                        RoleOutcome::Failed {
                            role: role.to_string(),
                            reason,
                        }
                    }
                },
            };

            info!(alias = %alias, role = ?role, "Identity linked");

            Ok(LinkOutcome { account, role })
        }
        .await;

        track("link", result)
    }

    /// Read a balance. `target` defaults to the caller; reading anyone else
    /// requires privilege.
    #[instrument(skip(self), fields(caller = %caller.identity))]
    pub async fn get_balance(
        &self,
        caller: &Caller,
        target: Option<Identity>,
    ) -> Result<BalanceView, LedgerError> {
        let result: Result<BalanceView, LedgerError> = async {
            let target = target.unwrap_or(caller.identity);
            let is_self = target == caller.identity;
            caller.authorize(if is_self {
                Operation::ReadOwnBalance
            } else {
                Operation::ReadOtherBalance
            })?;

            let account = self
                .store
                .get_account(target)
                .await?
                .ok_or(LedgerError::NotFound(target))?;

            Ok(BalanceView { account, is_self })
        }
        .await;

        track("get_balance", result)
    }

    /// Highest balances first, at most [`TOP_BALANCES_LIMIT`]. Privileged.
    #[instrument(skip(self), fields(caller = %caller.identity))]
    pub async fn top_balances(&self, caller: &Caller) -> Result<Vec<Account>, LedgerError> {
        let result: Result<Vec<Account>, LedgerError> = async {
            caller.authorize(Operation::TopBalances)?;
            self.store.top_n(TOP_BALANCES_LIMIT).await
        }
        .await;

        track("top_balances", result)
    }

    /// Add `amount` to `target`, creating the account if needed. Privileged.
    #[instrument(skip(self), fields(caller = %caller.identity, target = %target))]
    pub async fn credit(
        &self,
        caller: &Caller,
        target: Identity,
        amount: i64,
    ) -> Result<Account, LedgerError> {
        let result: Result<Account, LedgerError> = async {
            caller.authorize(Operation::Credit)?;
            let account = self.store.increment_balance(target, amount).await?;
            info!(amount = amount, balance = account.balance, "Balance credited");
            Ok(account)
        }
        .await;

        track("credit", result)
    }

    /// Subtract `amount` from `target`. Privileged.
    ///
    /// An identity with no account is created at `-amount`, mirroring
    /// [`Ledger::credit`].
    #[instrument(skip(self), fields(caller = %caller.identity, target = %target))]
    pub async fn debit(
        &self,
        caller: &Caller,
        target: Identity,
        amount: i64,
    ) -> Result<Account, LedgerError> {
        let result: Result<Account, LedgerError> = async {
            caller.authorize(Operation::Debit)?;
            let delta = amount.checked_neg().ok_or_else(|| {
                LedgerError::InvalidArgument(format!("amount {} cannot be debited", amount))
            })?;
            let account = self.store.increment_balance(target, delta).await?;
            info!(amount = amount, balance = account.balance, "Balance debited");
            Ok(account)
        }
        .await;

        track("debit", result)
    }

    /// Overwrite the balance of `target`, creating the account if needed.
    /// Privileged.
    #[instrument(skip(self), fields(caller = %caller.identity, target = %target))]
    pub async fn set_balance(
        &self,
        caller: &Caller,
        target: Identity,
        value: i64,
    ) -> Result<Account, LedgerError> {
        let result: Result<Account, LedgerError> = async {
            caller.authorize(Operation::SetBalance)?;
            let account = self.store.set_balance(target, value).await?;
            info!(balance = account.balance, "Balance set");
            Ok(account)
        }
        .await;

        track("set_balance", result)
    }

    /// Remove every account. Privileged.
    #[instrument(skip(self), fields(caller = %caller.identity))]
    pub async fn reset_accounts(&self, caller: &Caller) -> Result<u64, LedgerError> {
        let result: Result<u64, LedgerError> = async {
            caller.authorize(Operation::ResetAccounts)?;
            let removed = self.store.clear_all().await?;
            warn!(removed = removed, "All accounts reset");
            Ok(removed)
        }
        .await;

        track("reset_accounts", result)
    }
}

fn track<T>(operation: &str, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
    match &result {
        Ok(_) => record_ledger_operation(operation, "ok"),
        Err(e) => {
            record_ledger_operation(operation, e.kind());
            record_error(e.kind());
            if let LedgerError::StoreUnavailable(source) = e {
                warn!(operation = operation, error = %source, "Store operation failed");
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryStore;
    use crate::services::role_grant::DisabledRoleGrant;
    use async_trait::async_trait;

    struct KnownRoles(&'static [&'static str]);

    #[async_trait]
    impl RoleGrant for KnownRoles {
        async fn grant_role(&self, _identity: Identity, role: &str) -> Result<(), RoleGrantError> {
            if self.0.contains(&role) {
                Ok(())
            } else {
                Err(RoleGrantError::NotFound(role.to_string()))
            }
        }
    }

    fn id(raw: i64) -> Identity {
        Identity::new(raw).unwrap()
    }

    fn ledger_with_roles(roles: Arc<dyn RoleGrant>) -> Ledger {
        Ledger::new(Arc::new(InMemoryStore::new()), roles)
    }

    fn ledger() -> Ledger {
        ledger_with_roles(Arc::new(DisabledRoleGrant))
    }

    fn admin() -> Caller {
        Caller::new(id(1), true)
    }

    fn member(raw: i64) -> Caller {
        Caller::new(id(raw), false)
    }

    #[tokio::test]
    async fn link_twice_keeps_single_account_and_balance() {
        let ledger = ledger();
        ledger.credit(&admin(), id(7), 30).await.unwrap();

        let first = ledger.link(&member(7), id(7), "neo", None).await.unwrap();
        let second = ledger.link(&member(7), id(7), "neo", None).await.unwrap();

        assert_eq!(first.account.balance, 30);
        assert_eq!(second.account.balance, 30);
        assert_eq!(first.account.id, second.account.id);
        assert_eq!(first.role, RoleOutcome::NotRequested);
        assert!(!second.is_partial());
    }

    #[tokio::test]
    async fn link_with_unknown_role_is_partial_success() {
        let ledger = ledger_with_roles(Arc::new(KnownRoles(&["member"])));

        let outcome = ledger
            .link(&member(7), id(7), "neo", Some("ghost"))
            .await
            .unwrap();
        assert_eq!(outcome.role, RoleOutcome::RoleNotFound("ghost".to_string()));
        assert!(outcome.is_partial());

        let view = ledger.get_balance(&member(7), None).await.unwrap();
        assert_eq!(view.account.alias.as_deref(), Some("neo"));
    }

    #[tokio::test]
    async fn link_with_known_role_is_granted() {
        let ledger = ledger_with_roles(Arc::new(KnownRoles(&["member"])));
        let outcome = ledger
            .link(&member(7), id(7), "neo", Some("member"))
            .await
            .unwrap();
        assert_eq!(outcome.role, RoleOutcome::Granted("member".to_string()));
        assert_eq!(outcome.role.role_name(), Some("member"));
    }

    #[tokio::test]
    async fn link_rejects_blank_alias_before_storing() {
        let ledger = ledger();
        let err = ledger.link(&member(7), id(7), "  ", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert!(ledger.store().get_account(id(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reading_another_balance_requires_privilege() {
        let ledger = ledger();
        ledger.set_balance(&admin(), id(9), 500).await.unwrap();

        let err = ledger.get_balance(&member(8), Some(id(9))).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));

        let view = ledger.get_balance(&admin(), Some(id(9))).await.unwrap();
        assert_eq!(view.account.balance, 500);
        assert!(!view.is_self);
    }

    #[tokio::test]
    async fn unlinked_read_is_not_found() {
        let ledger = ledger();
        let err = ledger.get_balance(&member(8), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(i) if i == id(8)));
    }

    #[tokio::test]
    async fn mutations_require_privilege_and_do_not_touch_store() {
        let ledger = ledger();
        let caller = member(2);

        assert!(matches!(
            ledger.credit(&caller, id(3), 10).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.debit(&caller, id(3), 10).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.set_balance(&caller, id(3), 10).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.top_balances(&caller).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            ledger.reset_accounts(&caller).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(ledger.store().get_account(id(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn debit_on_missing_account_creates_negative_balance() {
        let ledger = ledger();
        let account = ledger.debit(&admin(), id(4), 15).await.unwrap();
        assert_eq!(account.balance, -15);
        assert!(account.alias.is_none());
    }

    #[tokio::test]
    async fn debit_of_min_amount_is_invalid() {
        let ledger = ledger();
        let err = ledger.debit(&admin(), id(4), i64::MIN).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn set_balance_allows_negative_values() {
        let ledger = ledger();
        ledger.credit(&admin(), id(5), 100).await.unwrap();
        assert_eq!(ledger.set_balance(&admin(), id(5), -5).await.unwrap().balance, -5);
        assert_eq!(ledger.set_balance(&admin(), id(6), -5).await.unwrap().balance, -5);
    }

    #[tokio::test]
    async fn top_balances_ranks_descending_and_caps_at_limit() {
        let ledger = ledger();
        for (raw, balance) in [(10, 50), (11, 10), (12, 30)] {
            ledger.set_balance(&admin(), id(raw), balance).await.unwrap();
        }
        let balances: Vec<i64> = ledger
            .top_balances(&admin())
            .await
            .unwrap()
            .iter()
            .map(|a| a.balance)
            .collect();
        assert_eq!(balances, vec![50, 30, 10]);

        for raw in 100..130 {
            ledger.credit(&admin(), id(raw), raw).await.unwrap();
        }
        let top = ledger.top_balances(&admin()).await.unwrap();
        assert_eq!(top.len(), TOP_BALANCES_LIMIT as usize);
        assert_eq!(top[0].balance, 129);
    }
}
