//! Counterbalance API Server Entry Point
//!
//! Loads configuration, opens the store, starts the abandonment reaper and
//! serves the Axum router until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use counterbalance_api::constants::DEFAULT_API_PORT;
use counterbalance_api::jobs::{reaper_task, ReaperConfig, ReaperMetrics};
use counterbalance_api::telemetry::{init_tracing, TelemetryConfig};
use counterbalance_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, AssignmentConfig, DbClient,
    DbConfig, StoreKind,
};
use counterbalance_storage::{AssignmentStore, InMemoryAssignmentStore};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let assignment_config = AssignmentConfig::from_env()?;
    let reaper_config = ReaperConfig::from_env()?;
    let api_config = ApiConfig::from_env();

    let store: Arc<dyn AssignmentStore> = match StoreKind::from_env()? {
        StoreKind::Postgres => {
            let db_config = DbConfig::from_env();
            let db = DbClient::from_config(&db_config)?;
            db.migrate().await?;
            Arc::new(db)
        }
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store; assignments are lost on restart");
            Arc::new(InMemoryAssignmentStore::new())
        }
    };

    tracing::info!(
        groups = %assignment_config.groups,
        mode = %assignment_config.mode,
        "Assignment service configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = tokio::spawn(reaper_task(
        store.clone(),
        reaper_config,
        Arc::new(ReaperMetrics::new()),
        shutdown_rx,
    ));

    let state = AppState::new(store, assignment_config);
    let app: Router = create_api_router(state, &api_config);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting counterbalance API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper.await {
        tracing::error!(error = %e, "Abandonment reaper task failed");
    }

    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host =
        std::env::var("COUNTERBALANCE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("COUNTERBALANCE_API_PORT").ok())
        .unwrap_or_else(|| DEFAULT_API_PORT.to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
