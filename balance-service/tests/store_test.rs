//! PostgreSQL identity store integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -p balance-service -- --ignored

mod common;

use balance_service::error::LedgerError;
use balance_service::grpc::proto::{GetBalanceRequest, TopBalancesRequest};
use balance_service::models::Identity;
use balance_service::services::{Database, IdentityStore};
use common::{as_caller, credit, init_tracing, link, spawn_app_with_postgres, OPERATOR};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn id(raw: i64) -> Identity {
    Identity::new(raw).unwrap()
}

async fn fresh_store() -> Arc<Database> {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for database tests");
    let db = Database::new(&database_url, 10, 1, Duration::from_secs(5))
        .await
        .expect("Failed to connect");
    db.run_migrations().await.expect("Failed to migrate");
    db.clear_all().await.expect("Failed to clear accounts");
    Arc::new(db)
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn upsert_alias_keeps_balance() {
    let db = fresh_store().await;

    let created = db.upsert_alias(id(10), "Neo").await.unwrap();
    assert_eq!(created.balance, 0);
    assert_eq!(created.alias.as_deref(), Some("Neo"));

    db.increment_balance(id(10), 70).await.unwrap();
    let relinked = db.upsert_alias(id(10), "Trinity").await.unwrap();
    assert_eq!(relinked.id, created.id);
    assert_eq!(relinked.alias.as_deref(), Some("Trinity"));
    assert_eq!(relinked.balance, 70);
}

#[tokio::test]
#[ignore]
#[serial]
async fn increment_and_set_create_missing_accounts() {
    let db = fresh_store().await;

    let credited = db.increment_balance(id(20), -15).await.unwrap();
    assert_eq!(credited.balance, -15);
    assert!(!credited.is_linked());

    let set = db.set_balance(id(21), 42).await.unwrap();
    assert_eq!(set.balance, 42);

    assert_eq!(db.get_account(id(22)).await.unwrap(), None);
}

#[tokio::test]
#[ignore]
#[serial]
async fn concurrent_increments_are_atomic() {
    let db = fresh_store().await;

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let db = db.clone();
            let delta = if i % 2 == 0 { 3 } else { -1 };
            tokio::spawn(async move { db.increment_balance(id(30), delta).await })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.expect("task panicked").expect("increment failed");
    }

    let account = db.get_account(id(30)).await.unwrap().unwrap();
    assert_eq!(account.balance, 50 * 3 - 50);
}

#[tokio::test]
#[ignore]
#[serial]
async fn top_n_breaks_ties_by_creation_order() {
    let db = fresh_store().await;

    db.set_balance(id(41), 10).await.unwrap();
    db.set_balance(id(42), 30).await.unwrap();
    db.set_balance(id(43), 30).await.unwrap();
    db.set_balance(id(44), -2).await.unwrap();

    let top = db.top_n(3).await.unwrap();
    let order: Vec<i64> = top.iter().map(|a| a.identity.get()).collect();
    assert_eq!(order, vec![42, 43, 41]);
}

#[tokio::test]
#[ignore]
#[serial]
async fn overflow_is_rejected_and_balance_unchanged() {
    let db = fresh_store().await;

    db.set_balance(id(50), i64::MAX - 1).await.unwrap();
    let result = db.increment_balance(id(50), 5).await;
    assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));

    let account = db.get_account(id(50)).await.unwrap().unwrap();
    assert_eq!(account.balance, i64::MAX - 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn clear_all_reports_removed_rows() {
    let db = fresh_store().await;

    db.upsert_alias(id(60), "a").await.unwrap();
    db.upsert_alias(id(61), "b").await.unwrap();
    assert_eq!(db.clear_all().await.unwrap(), 2);
    assert!(db.top_n(20).await.unwrap().is_empty());
    db.health_check().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn grpc_round_trip_over_postgres() {
    let mut app = spawn_app_with_postgres().await;

    link(&mut app.client, 70, "Morpheus").await;
    credit(&mut app.client, 70, 5).await;
    credit(&mut app.client, 71, 9).await;

    let own = app
        .client
        .get_balance(as_caller(GetBalanceRequest::default(), 70, false))
        .await
        .unwrap()
        .into_inner()
        .account
        .unwrap();
    assert_eq!(own.alias, "Morpheus");
    assert_eq!(own.balance, 5);

    let top = app
        .client
        .top_balances(as_caller(TopBalancesRequest {}, OPERATOR, true))
        .await
        .unwrap()
        .into_inner()
        .accounts;
    let identities: Vec<&str> = top.iter().map(|a| a.identity.as_str()).collect();
    assert_eq!(identities, vec!["71", "70"]);
}
