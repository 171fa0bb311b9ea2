//! API Server Module
//!
//! Router setup and serving for the run engine's HTTP surface.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{
    create_plan, get_plan, get_run, health_check, list_plans, list_runs, list_tools,
    resume_run, rollback_run, run_audit, start_run, ApiState,
};
use crate::models::ApiConfig;

/// Main API server
pub struct ApiServer {
    /// Server configuration
    config: ApiConfig,
    /// Shared state
    state: Arc<ApiState>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiConfig, state: ApiState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Start the API server
    pub async fn start(&self) -> Result<()> {
        info!(
            "Starting runbook API server on {}:{}",
            self.config.host, self.config.port
        );

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Build the application with the shared state
        let app = Router::new()
            // Plan operations
            .route("/api/plans", post(create_plan))
            .route("/api/plans", get(list_plans))
            .route("/api/plans/:id", get(get_plan))
            // Run operations
            .route("/api/runs", post(start_run))
            .route("/api/runs", get(list_runs))
            .route("/api/runs/:id", get(get_run))
            .route("/api/runs/:id/audit", get(run_audit))
            .route("/api/runs/:id/resume", post(resume_run))
            .route("/api/runs/:id/rollback", post(rollback_run))
            // Tool catalog
            .route("/api/tools", get(list_tools))
            // Health check
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone());

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
        info!("Runbook API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start API server: {}", e))?;

        Ok(())
    }
}
