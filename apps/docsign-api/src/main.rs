//! DocSign API Server - Backend for document signing
//!
//! Provides REST endpoints for:
//! - Document upload and listing
//! - Burning text annotations into new document versions
//! - Version history and audit log
//! - Signed artifact downloads

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

mod blobs;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod state;

use config::ApiConfig;
use state::AppState;

fn router(state: Arc<AppState>) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Documents
        .route(
            "/api/documents",
            get(handlers::list_documents).post(handlers::create_document),
        )
        .route("/api/documents/:id", get(handlers::get_document))
        .route("/api/documents/:id/versions", get(handlers::list_versions))
        .route("/api/documents/:id/audit", get(handlers::get_audit_log))
        // Commit protocol
        .route("/api/documents/:id/sign", post(handlers::sign_document))
        .route(
            "/api/documents/:id/reconcile",
            post(handlers::reconcile_commit),
        )
        // Artifact delivery
        .route("/blobs/*pointer", get(handlers::get_blob))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("docsign_api=info".parse()?)
                .add_directive("docsign_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = ApiConfig::from_env()?;
    let port = config.port;

    // Initialize application state
    info!("Initializing DocSign API...");
    let state = Arc::new(AppState::new(config).await?);

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting DocSign API on http://{}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
