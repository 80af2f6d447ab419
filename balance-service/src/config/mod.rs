//! Configuration module for balance-service.

use crate::models::Identity;
use service_core::config::{self as core_config, env_or};
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct BalanceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub role_grant: RoleGrantConfig,
    pub access: AccessConfig,
    pub commands: CommandConfig,
}

/// Where accounts are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RoleGrantConfig {
    /// Chat gateway base URL. Empty disables role grants.
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AccessConfig {
    /// When non-empty, only these identities are privileged and the
    /// `x-caller-privileged` header is ignored.
    pub admin_identities: Vec<Identity>,
}

#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub prefixes: Vec<String>,
}

impl BalanceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store: StoreBackend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let database_url = env::var("DATABASE_URL").unwrap_or_default();
        if store == StoreBackend::Postgres && database_url.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL is required"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "balance-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2)?,
                acquire_timeout_secs: env_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
            },
            role_grant: RoleGrantConfig {
                endpoint: env::var("ROLE_GRANT_ENDPOINT").unwrap_or_default(),
                timeout_secs: env_or("ROLE_GRANT_TIMEOUT_SECS", 5)?,
            },
            access: AccessConfig {
                admin_identities: parse_identity_list(
                    &env::var("ADMIN_IDENTITIES").unwrap_or_default(),
                )?,
            },
            commands: CommandConfig {
                prefixes: parse_prefixes(
                    &env::var("COMMAND_PREFIXES").unwrap_or_else(|_| "-".to_string()),
                )?,
            },
        })
    }
}

fn parse_identity_list(raw: &str) -> Result<Vec<Identity>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Identity>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("ADMIN_IDENTITIES: {}", e))
            })
        })
        .collect()
}

fn parse_prefixes(raw: &str) -> Result<Vec<String>, AppError> {
    let prefixes: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if prefixes.is_empty() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "COMMAND_PREFIXES must name at least one prefix"
        )));
    }
    Ok(prefixes)
}
