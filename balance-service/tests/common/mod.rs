//! Common test utilities for balance-service integration tests.

#![allow(dead_code)]

use balance_service::config::{
    AccessConfig, BalanceConfig, CommandConfig, DatabaseConfig, RoleGrantConfig, StoreBackend,
};
use balance_service::grpc::capability_check::{CALLER_ID_KEY, CALLER_PRIVILEGED_KEY};
use balance_service::grpc::proto::{
    balance_service_client::BalanceServiceClient, AdjustBalanceRequest, AdjustBalanceResponse,
    LinkRequest, LinkResponse, ResetAccountsRequest,
};
use balance_service::startup::Application;
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use tonic::transport::Channel;
use tonic::Request;

static INIT: Once = Once::new();

/// Privileged identity used by tests that need an operator.
pub const OPERATOR: i64 = 1;

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,balance_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub client: BalanceServiceClient<Channel>,
    pub http_address: String,
}

fn test_config(store: StoreBackend, database_url: String) -> BalanceConfig {
    BalanceConfig {
        common: CommonConfig { port: 0 },
        service_name: "balance-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
        },
        role_grant: RoleGrantConfig {
            endpoint: String::new(),
            timeout_secs: 1,
        },
        access: AccessConfig::default(),
        commands: CommandConfig {
            prefixes: vec!["-".to_string(), "!".to_string()],
        },
    }
}

/// Spawn the service over a fresh in-memory store.
pub async fn spawn_app() -> TestApp {
    spawn(test_config(StoreBackend::Memory, String::new())).await
}

/// Spawn the service over PostgreSQL and wipe the accounts table.
///
/// Callers must be `#[serial]`: the table is shared.
pub async fn spawn_app_with_postgres() -> TestApp {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for database tests");

    let mut app = spawn(test_config(StoreBackend::Postgres, database_url)).await;
    app.client
        .reset_accounts(as_caller(ResetAccountsRequest { confirm: true }, OPERATOR, true))
        .await
        .expect("Failed to reset accounts");
    app
}

async fn spawn(config: BalanceConfig) -> TestApp {
    init_tracing();

    let app = Application::build(config)
        .await
        .expect("Failed to build application");

    let http_address = format!("http://127.0.0.1:{}", app.http_port());
    let grpc_addr = format!("http://127.0.0.1:{}", app.grpc_port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = {
        let mut attempts = 0;
        loop {
            match BalanceServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        client,
        http_address,
    }
}

/// Wrap `message` with caller metadata.
pub fn as_caller<T>(message: T, identity: i64, privileged: bool) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(CALLER_ID_KEY, identity.to_string().parse().unwrap());
    if privileged {
        request
            .metadata_mut()
            .insert(CALLER_PRIVILEGED_KEY, "true".parse().unwrap());
    }
    request
}

/// Link `identity` to `alias` as that identity.
pub async fn link(
    client: &mut BalanceServiceClient<Channel>,
    identity: i64,
    alias: &str,
) -> LinkResponse {
    client
        .link(as_caller(
            LinkRequest {
                identity: identity.to_string(),
                alias: alias.to_string(),
                role_name: None,
            },
            identity,
            false,
        ))
        .await
        .expect("Failed to link")
        .into_inner()
}

/// Credit `identity` as the operator.
pub async fn credit(
    client: &mut BalanceServiceClient<Channel>,
    identity: i64,
    amount: i64,
) -> AdjustBalanceResponse {
    client
        .credit(as_caller(
            AdjustBalanceRequest {
                identity: identity.to_string(),
                amount,
            },
            OPERATOR,
            true,
        ))
        .await
        .expect("Failed to credit")
        .into_inner()
}
