//! PostgreSQL identity store for balance-service.

use crate::error::LedgerError;
use crate::models::{Account, Identity};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::IdentityStore;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

const ACCOUNT_COLUMNS: &str = "id, identity, alias, balance, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "balance-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for Database {
    #[instrument(skip(self, alias), fields(identity = %identity))]
    async fn upsert_alias(&self, identity: Identity, alias: &str) -> Result<Account, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_alias"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (identity, alias, balance)
            VALUES ($1, $2, 0)
            ON CONFLICT (identity) DO UPDATE
                SET alias = EXCLUDED.alias, updated_utc = NOW()
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(identity)
        .bind(alias)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(account)
    }

    #[instrument(skip(self), fields(identity = %identity))]
    async fn get_account(&self, identity: Identity) -> Result<Option<Account>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE identity = $1"
        ))
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(account)
    }

    #[instrument(skip(self), fields(identity = %identity, delta = delta))]
    async fn increment_balance(
        &self,
        identity: Identity,
        delta: i64,
    ) -> Result<Account, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_balance"])
            .start_timer();

        // Single statement: the row lock taken by ON CONFLICT serialises
        // concurrent increments, so no update is lost.
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (identity, balance)
            VALUES ($1, $2)
            ON CONFLICT (identity) DO UPDATE
                SET balance = accounts.balance + EXCLUDED.balance, updated_utc = NOW()
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(identity)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(account)
    }

    #[instrument(skip(self), fields(identity = %identity, value = value))]
    async fn set_balance(&self, identity: Identity, value: i64) -> Result<Account, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_balance"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (identity, balance)
            VALUES ($1, $2)
            ON CONFLICT (identity) DO UPDATE
                SET balance = EXCLUDED.balance, updated_utc = NOW()
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(identity)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(account)
    }

    #[instrument(skip(self))]
    async fn top_n(&self, limit: u32) -> Result<Vec<Account>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["top_n"])
            .start_timer();

        let accounts = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM accounts
            ORDER BY balance DESC, id ASC
            LIMIT $1
            "#
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(accounts)
    }

    #[instrument(skip(self))]
    async fn clear_all(&self) -> Result<u64, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clear_all"])
            .start_timer();

        let result = sqlx::query("DELETE FROM accounts")
            .execute(&self.pool)
            .await?;

        timer.observe_duration();

        info!(removed = result.rows_affected(), "All accounts cleared");

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
