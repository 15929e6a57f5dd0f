//! FlowGraph HTTP server.
//!
//! Exposes the `StartRun` entry point and run/step_run lookup over HTTP,
//! backed by the in-process `flowgraph_engine::WorkflowEngine` and
//! either the in-memory stores or a Postgres-backed `flowgraph-store`
//! (when `DATABASE_URL` is set). `Config::from_env`, `AppState`, an axum
//! `Router` with CORS + tracing layers, and graceful shutdown on
//! SIGINT/SIGTERM.

mod config;
mod error;
mod handlers;
mod host;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppState, Config};
use crate::handlers::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowgraph_server=info,flowgraph_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env();
    let bind_addr = config.bind_addr();

    tracing::info!(addr = %bind_addr, "starting FlowGraph server");
    if config.database_url.is_none() {
        tracing::warn!("DATABASE_URL not set, using in-memory workflow/run stores (not durable across restarts)");
    }

    let state = AppState::new(config).await?;

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/workflows", post(register_workflow).get(list_workflows))
        .route("/workflows/:workflow_id", get(get_workflow))
        .route("/workflows/:workflow_id/runs", post(start_run).get(list_runs))
        .route("/runs/:run_id", get(get_run))
        .route("/runs/:run_id/step_runs", get(list_step_runs))
        .route("/webhook/:binding", post(webhook_stub))
        .route("/runs/:run_id/steps/:step_id/approve", post(approval_stub))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "FlowGraph server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("FlowGraph server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
