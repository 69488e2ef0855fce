//! Application state for DocSign API

use anyhow::{Context, Result};
use docsign_core::Signer;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

use crate::blobs::FsBlobStore;
use crate::config::ApiConfig;
use crate::db::{self, SqliteDocumentStore};

pub struct AppState {
    pub signer: Signer,
    pub blobs: Arc<FsBlobStore>,
    pub config: ApiConfig,
}

impl AppState {
    pub async fn new(config: ApiConfig) -> Result<Self> {
        tracing::info!("Connecting to database: {}", config.database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await
            .context("Failed to open database")?;

        tokio::fs::create_dir_all(&config.blob_dir)
            .await
            .with_context(|| format!("Failed to create {}", config.blob_dir.display()))?;
        tracing::info!("Storing artifacts under {}", config.blob_dir.display());

        Self::with_pool(pool, config).await
    }

    /// Build state over an existing pool, running migrations first
    pub async fn with_pool(pool: SqlitePool, config: ApiConfig) -> Result<Self> {
        db::run_migrations(&pool).await?;

        let blobs = Arc::new(FsBlobStore::new(
            &config.blob_dir,
            &config.public_base_url,
            &config.url_signing_secret,
        ));
        let documents = Arc::new(SqliteDocumentStore::new(pool));
        let signer = Signer::new(documents, blobs.clone(), config.signing.clone());

        Ok(Self {
            signer,
            blobs,
            config,
        })
    }
}
