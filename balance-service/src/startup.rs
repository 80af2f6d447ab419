//! Application startup and lifecycle management.

use crate::commands::{CommandParser, Dispatcher};
use crate::config::{BalanceConfig, StoreBackend};
use crate::grpc::{
    proto::{balance_service_server::BalanceServiceServer, FILE_DESCRIPTOR_SET},
    AdminListOracle, BalanceServiceImpl, PermissionOracle, TrustedHeaderOracle,
};
use crate::services::{
    get_metrics, init_metrics, Database, DisabledRoleGrant, HttpRoleGrant, IdentityStore,
    InMemoryStore, Ledger, RoleGrant,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::grpc::trace_context_interceptor;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BalanceConfig,
    pub store: Arc<dyn IdentityStore>,
    pub dispatcher: Dispatcher,
    pub oracle: Arc<dyn PermissionOracle>,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    store: Arc<dyn IdentityStore>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "balance-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = ?e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "balance-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = ?e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// gRPC listens one port above HTTP, or on an ephemeral port when HTTP does.
pub fn grpc_port_for(http_port: u16) -> Result<u16, AppError> {
    if http_port == 0 {
        return Ok(0);
    }
    http_port.checked_add(1).ok_or_else(|| {
        AppError::ConfigError(anyhow::anyhow!(
            "APP__PORT {} leaves no room for the gRPC port",
            http_port
        ))
    })
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BalanceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: BalanceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BalanceConfig, run_migrations: bool) -> Result<Self, AppError> {
        let store: Arc<dyn IdentityStore> = match config.store {
            StoreBackend::Postgres => {
                let db = Database::new(
                    &config.database.url,
                    config.database.max_connections,
                    config.database.min_connections,
                    Duration::from_secs(config.database.acquire_timeout_secs),
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                if run_migrations {
                    db.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        e
                    })?;
                }

                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store - accounts are lost on restart");
                Arc::new(InMemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Build the application around an existing store.
    pub async fn build_with_store(
        config: BalanceConfig,
        store: Arc<dyn IdentityStore>,
    ) -> Result<Self, AppError> {
        // Initialize metrics
        init_metrics();

        let roles: Arc<dyn RoleGrant> = if config.role_grant.endpoint.is_empty() {
            tracing::info!("Role grant endpoint not configured - link roles will be reported as failed");
            Arc::new(DisabledRoleGrant)
        } else {
            let grant = HttpRoleGrant::new(
                &config.role_grant.endpoint,
                Duration::from_secs(config.role_grant.timeout_secs),
            )
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build role grant client: {}", e))
            })?;
            tracing::info!(endpoint = %config.role_grant.endpoint, "Role grants enabled");
            Arc::new(grant)
        };

        let oracle: Arc<dyn PermissionOracle> = if config.access.admin_identities.is_empty() {
            tracing::info!("Privilege resolved from upstream header (trusted dispatcher)");
            Arc::new(TrustedHeaderOracle)
        } else {
            tracing::info!(
                admins = config.access.admin_identities.len(),
                "Privilege resolved from configured admin list"
            );
            Arc::new(AdminListOracle::new(
                config.access.admin_identities.iter().copied(),
            ))
        };

        let ledger = Ledger::new(store.clone(), roles);
        let dispatcher = Dispatcher::new(
            CommandParser::new(config.commands.prefixes.iter().cloned()),
            ledger,
        );

        let state = AppState {
            config: config.clone(),
            store,
            dispatcher,
            oracle,
        };

        let grpc_port_wanted = grpc_port_for(config.common.port)?;

        // Bind HTTP listener
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        // Bind gRPC listener
        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], grpc_port_wanted));
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Balance service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get the gRPC port the server is listening on.
    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.state.store
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        // Build minimal HTTP router (health + metrics)
        let health_state = HealthState {
            store: self.state.store.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        // Build gRPC server
        let balance_service =
            BalanceServiceImpl::new(self.state.dispatcher.clone(), self.state.oracle.clone());

        // gRPC health service
        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<BalanceServiceServer<BalanceServiceImpl>>()
            .await;

        // Reflection service for debugging
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        // gRPC trace layer for observability
        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let balance_service_with_interceptor =
            BalanceServiceServer::with_interceptor(balance_service, trace_context_interceptor);

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(balance_service_with_interceptor)
            .serve_with_incoming(incoming);

        tracing::info!(
            service = %self.state.config.service_name,
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        // Run both servers concurrently
        tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            result = grpc_server => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "gRPC server error");
                    return Err(std::io::Error::other(format!("gRPC server error: {}", e)));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_port_follows_http_port() {
        assert_eq!(grpc_port_for(8080).unwrap(), 8081);
        assert_eq!(grpc_port_for(0).unwrap(), 0);
        assert!(matches!(
            grpc_port_for(u16::MAX),
            Err(AppError::ConfigError(_))
        ));
    }
}
