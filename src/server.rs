//! Server assembly and lifecycle.
//!
//! Builds the database handle, the workflow orchestrator, and the router,
//! then serves until Ctrl+C. Shutdown drains shared sessions through the
//! orchestrator before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::cors::CorsLayer;

use crate::api::{api_router, AppState, SharedState};
use crate::db::{AnalysisDb, DbHandle};
use crate::executor::StubRunner;
use crate::orchestrator::{OrchestratorOptions, WorkflowOrchestrator};

/// Settings for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub documents_dir: PathBuf,
    pub agents_config: PathBuf,
    pub servers_config: PathBuf,
    /// Bind all interfaces and relax CORS for local frontend work.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8000,
            db_path: PathBuf::from("data/verifact.db"),
            documents_dir: PathBuf::from("data/documents"),
            agents_config: PathBuf::from("config/agents.yaml"),
            servers_config: PathBuf::from("config/tool_servers.yaml"),
            dev_mode: false,
        }
    }
}

pub fn build_router(state: SharedState, dev_mode: bool) -> axum::Router {
    let router = api_router().with_state(state);
    if dev_mode {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    std::fs::create_dir_all(&config.documents_dir).with_context(|| {
        format!(
            "Failed to create documents directory {}",
            config.documents_dir.display()
        )
    })?;

    let db = DbHandle::new(AnalysisDb::new(&config.db_path)?);
    let orchestrator = Arc::new(WorkflowOrchestrator::from_config(
        &config.agents_config,
        &config.servers_config,
        Arc::new(StubRunner),
        OrchestratorOptions::default(),
    )?);

    let state: SharedState = Arc::new(AppState {
        db,
        orchestrator: orchestrator.clone(),
        documents_dir: config.documents_dir.clone(),
    });
    let router = build_router(state, config.dev_mode);

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{host}:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    println!("verifact server running at http://{addr}");
    println!("Submit documents with POST /api/analyze");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await
        .context("Server error")?;
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal(orchestrator: Arc<WorkflowOrchestrator>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
    orchestrator.close().await;
}
