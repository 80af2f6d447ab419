//! BalanceService gRPC implementation.

use crate::commands::{CommandOutcome, Dispatcher};
use crate::error::LedgerError;
use crate::grpc::capability_check::{resolve_caller, CallerMetadata, PermissionOracle};
use crate::grpc::proto::{
    balance_service_server::BalanceService, dispatch_response::Outcome, Account as ProtoAccount,
    AdjustBalanceRequest, AdjustBalanceResponse, DispatchRequest, DispatchResponse,
    GetBalanceRequest, GetBalanceResponse, LinkRequest, LinkResponse, ResetAccountsRequest,
    ResetAccountsResponse, RoleOutcome as ProtoRoleOutcome, SetBalanceRequest, TopBalancesRequest,
    TopBalancesResponse,
};
use crate::models::{Account, Identity};
use crate::services::metrics::{GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::{Caller, Ledger, LinkOutcome, Operation, RoleOutcome};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{instrument, warn};

/// BalanceService implementation.
pub struct BalanceServiceImpl {
    dispatcher: Dispatcher,
    oracle: Arc<dyn PermissionOracle>,
}

impl BalanceServiceImpl {
    /// Create a new BalanceService instance.
    pub fn new(dispatcher: Dispatcher, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self { dispatcher, oracle }
    }

    fn ledger(&self) -> &Ledger {
        self.dispatcher.ledger()
    }

    /// Extract the caller before any await, then ask the oracle.
    async fn caller(
        &self,
        metadata: Result<CallerMetadata, Status>,
        method: &str,
    ) -> Result<Caller, Status> {
        let metadata = metadata.map_err(|e| {
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, "unauthenticated"])
                .inc();
            e
        })?;
        Ok(resolve_caller(self.oracle.as_ref(), metadata).await)
    }

    fn timestamp(at: DateTime<Utc>) -> Timestamp {
        Timestamp {
            seconds: at.timestamp(),
            nanos: at.timestamp_subsec_nanos() as i32,
        }
    }

    /// Convert domain Account to proto Account.
    fn account_to_proto(account: &Account) -> ProtoAccount {
        ProtoAccount {
            identity: account.identity.to_string(),
            alias: account.alias.clone().unwrap_or_default(),
            balance: account.balance,
            linked: account.is_linked(),
            created_at: Some(Self::timestamp(account.created_utc)),
            updated_at: Some(Self::timestamp(account.updated_utc)),
        }
    }

    fn link_to_proto(outcome: &LinkOutcome) -> LinkResponse {
        let (role_outcome, role_detail) = match &outcome.role {
            RoleOutcome::NotRequested => (ProtoRoleOutcome::NotRequested, String::new()),
            RoleOutcome::Granted(_) => (ProtoRoleOutcome::Granted, String::new()),
            RoleOutcome::RoleNotFound(_) => (ProtoRoleOutcome::RoleNotFound, String::new()),
            RoleOutcome::Failed { reason, .. } => (ProtoRoleOutcome::Failed, reason.clone()),
        };

        LinkResponse {
            account: Some(Self::account_to_proto(&outcome.account)),
            role_outcome: role_outcome as i32,
            role_name: outcome.role.role_name().unwrap_or_default().to_string(),
            role_detail,
            partial: outcome.is_partial(),
        }
    }

    fn adjusted(account: &Account) -> AdjustBalanceResponse {
        AdjustBalanceResponse {
            account: Some(Self::account_to_proto(account)),
        }
    }

    fn top_to_proto(accounts: &[Account]) -> TopBalancesResponse {
        TopBalancesResponse {
            accounts: accounts.iter().map(Self::account_to_proto).collect(),
        }
    }

    fn parse_identity(raw: &str) -> Result<Identity, LedgerError> {
        raw.parse()
    }

    /// Record metrics for a finished call and convert the result.
    fn finish<T>(method: &str, result: Result<T, LedgerError>) -> Result<Response<T>, Status> {
        match result {
            Ok(body) => {
                GRPC_REQUESTS_TOTAL.with_label_values(&[method, "ok"]).inc();
                Ok(Response::new(body))
            }
            Err(e) => {
                GRPC_REQUESTS_TOTAL
                    .with_label_values(&[method, e.kind()])
                    .inc();
                if !matches!(e, LedgerError::StoreUnavailable(_)) {
                    warn!(method = method, error = %e, "Request rejected");
                }
                Err(e.into())
            }
        }
    }
}

#[tonic::async_trait]
impl BalanceService for BalanceServiceImpl {
    #[instrument(skip(self, request), fields(service = "balance-service", method = "Link"))]
    async fn link(&self, request: Request<LinkRequest>) -> Result<Response<LinkResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Link"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "Link").await?;
        let req = request.into_inner();

        let result: Result<LinkResponse, LedgerError> = async {
            let target = Self::parse_identity(&req.identity)?;
            let outcome = self
                .ledger()
                .link(&caller, target, &req.alias, req.role_name.as_deref())
                .await?;
            Ok(Self::link_to_proto(&outcome))
        }
        .await;

        timer.observe_duration();
        Self::finish("Link", result)
    }

    #[instrument(skip(self, request), fields(service = "balance-service", method = "GetBalance"))]
    async fn get_balance(
        &self,
        request: Request<GetBalanceRequest>,
    ) -> Result<Response<GetBalanceResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["GetBalance"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "GetBalance").await?;
        let req = request.into_inner();

        let result: Result<GetBalanceResponse, LedgerError> = async {
            let target = if req.identity.trim().is_empty() {
                None
            } else {
                Some(Self::parse_identity(&req.identity)?)
            };
            let view = self.ledger().get_balance(&caller, target).await?;
            Ok(GetBalanceResponse {
                account: Some(Self::account_to_proto(&view.account)),
            })
        }
        .await;

        timer.observe_duration();
        Self::finish("GetBalance", result)
    }

    #[instrument(skip(self, request), fields(service = "balance-service", method = "TopBalances"))]
    async fn top_balances(
        &self,
        request: Request<TopBalancesRequest>,
    ) -> Result<Response<TopBalancesResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["TopBalances"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "TopBalances").await?;

        let result = self
            .ledger()
            .top_balances(&caller)
            .await
            .map(|accounts| Self::top_to_proto(&accounts));

        timer.observe_duration();
        Self::finish("TopBalances", result)
    }

    #[instrument(skip(self, request), fields(service = "balance-service", method = "Credit"))]
    async fn credit(
        &self,
        request: Request<AdjustBalanceRequest>,
    ) -> Result<Response<AdjustBalanceResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Credit"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "Credit").await?;
        let req = request.into_inner();

        let result: Result<AdjustBalanceResponse, LedgerError> = async {
            self.ledger().authorize(&caller, Operation::Credit)?;
            let target = Self::parse_identity(&req.identity)?;
            let account = self.ledger().credit(&caller, target, req.amount).await?;
            Ok(Self::adjusted(&account))
        }
        .await;

        timer.observe_duration();
        Self::finish("Credit", result)
    }

    #[instrument(skip(self, request), fields(service = "balance-service", method = "Debit"))]
    async fn debit(
        &self,
        request: Request<AdjustBalanceRequest>,
    ) -> Result<Response<AdjustBalanceResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Debit"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "Debit").await?;
        let req = request.into_inner();

        let result: Result<AdjustBalanceResponse, LedgerError> = async {
            self.ledger().authorize(&caller, Operation::Debit)?;
            let target = Self::parse_identity(&req.identity)?;
            let account = self.ledger().debit(&caller, target, req.amount).await?;
            Ok(Self::adjusted(&account))
        }
        .await;

        timer.observe_duration();
        Self::finish("Debit", result)
    }

    #[instrument(skip(self, request), fields(service = "balance-service", method = "SetBalance"))]
    async fn set_balance(
        &self,
        request: Request<SetBalanceRequest>,
    ) -> Result<Response<AdjustBalanceResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["SetBalance"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "SetBalance").await?;
        let req = request.into_inner();

        let result: Result<AdjustBalanceResponse, LedgerError> = async {
            self.ledger().authorize(&caller, Operation::SetBalance)?;
            let target = Self::parse_identity(&req.identity)?;
            let account = self.ledger().set_balance(&caller, target, req.value).await?;
            Ok(Self::adjusted(&account))
        }
        .await;

        timer.observe_duration();
        Self::finish("SetBalance", result)
    }

    #[instrument(skip(self, request), fields(service = "balance-service", method = "ResetAccounts"))]
    async fn reset_accounts(
        &self,
        request: Request<ResetAccountsRequest>,
    ) -> Result<Response<ResetAccountsResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["ResetAccounts"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "ResetAccounts").await?;
        let req = request.into_inner();

        let result: Result<ResetAccountsResponse, LedgerError> = async {
            self.ledger().authorize(&caller, Operation::ResetAccounts)?;
            if !req.confirm {
                return Err(LedgerError::InvalidArgument(
                    "confirm must be true to reset accounts".to_string(),
                ));
            }
            let removed = self.ledger().reset_accounts(&caller).await?;
            Ok(ResetAccountsResponse { removed })
        }
        .await;

        timer.observe_duration();
        Self::finish("ResetAccounts", result)
    }

    #[instrument(skip(self, request), fields(service = "balance-service", method = "Dispatch"))]
    async fn dispatch(
        &self,
        request: Request<DispatchRequest>,
    ) -> Result<Response<DispatchResponse>, Status> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Dispatch"])
            .start_timer();
        let metadata = CallerMetadata::from_request(&request);
        let caller = self.caller(metadata, "Dispatch").await?;
        let req = request.into_inner();

        let result = self
            .dispatcher
            .dispatch(&caller, &req.line)
            .await
            .map(|outcome| {
                let outcome = outcome.map(|outcome| match outcome {
                    CommandOutcome::Linked(link) => Outcome::Linked(Self::link_to_proto(&link)),
                    CommandOutcome::Balance(view) => Outcome::Balance(GetBalanceResponse {
                        account: Some(Self::account_to_proto(&view.account)),
                    }),
                    CommandOutcome::Top(accounts) => Outcome::Top(Self::top_to_proto(&accounts)),
                    CommandOutcome::Credited(account)
                    | CommandOutcome::Debited(account)
                    | CommandOutcome::BalanceSet(account) => {
                        Outcome::Adjusted(Self::adjusted(&account))
                    }
                });
                DispatchResponse {
                    handled: outcome.is_some(),
                    outcome,
                }
            });

        timer.observe_duration();
        Self::finish("Dispatch", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandParser;
    use crate::grpc::capability_check::{FixedOracle, CALLER_ID_KEY};
    use crate::services::{DisabledRoleGrant, InMemoryStore};

    fn service(privileged: bool) -> BalanceServiceImpl {
        let ledger = Ledger::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(DisabledRoleGrant),
        );
        BalanceServiceImpl::new(
            Dispatcher::new(CommandParser::default(), ledger),
            Arc::new(FixedOracle(privileged)),
        )
    }

    fn from(identity: &str, message: AdjustBalanceRequest) -> Request<AdjustBalanceRequest> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(CALLER_ID_KEY, identity.parse().unwrap());
        request
    }

    #[tokio::test]
    async fn oracle_decides_privilege() {
        let message = AdjustBalanceRequest {
            identity: "9".to_string(),
            amount: 3,
        };

        let denied = service(false)
            .credit(from("9", message.clone()))
            .await
            .unwrap_err();
        assert_eq!(denied.code(), tonic::Code::PermissionDenied);

        let response = service(true)
            .credit(from("9", message))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.account.unwrap().balance, 3);
    }

    #[tokio::test]
    async fn debit_of_minimum_amount_is_invalid() {
        let status = service(true)
            .debit(from(
                "9",
                AdjustBalanceRequest {
                    identity: "9".to_string(),
                    amount: i64::MIN,
                },
            ))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn denied_privileged_rpc_is_counted() {
        let denied = || {
            crate::services::metrics::LEDGER_OPERATIONS_TOTAL
                .with_label_values(&["reset_accounts", "unauthorized"])
                .get()
        };
        let before = denied();

        let mut request = Request::new(ResetAccountsRequest { confirm: true });
        request
            .metadata_mut()
            .insert(CALLER_ID_KEY, "9".parse().unwrap());
        let status = service(false).reset_accounts(request).await.unwrap_err();

        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert!(denied() >= before + 1.0);
    }
}
