//! Error types for DocSign API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docsign_core::{CommitError, StoreError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Download link is invalid")]
    InvalidLink,

    #[error("Download link has expired")]
    LinkExpired,

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidLink => StatusCode::FORBIDDEN,
            ApiError::LinkExpired => StatusCode::GONE,
            ApiError::Commit(err) => match err {
                CommitError::Validation(_) | CommitError::Format(_) => StatusCode::BAD_REQUEST,
                CommitError::Placement(_) | CommitError::PageIndex { .. } | CommitError::Font(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                CommitError::NotFound(_) => StatusCode::NOT_FOUND,
                CommitError::Cancelled
                | CommitError::InProgress(_)
                | CommitError::Concurrency { .. } => StatusCode::CONFLICT,
                CommitError::Compositing(_) => StatusCode::INTERNAL_SERVER_ERROR,
                CommitError::Storage { .. } => StatusCode::BAD_GATEWAY,
                CommitError::Persistence { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Store(StoreError::ArtifactNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let message = match &self {
            ApiError::Store(StoreError::ArtifactNotFound(_)) => "Artifact not found".to_string(),
            ApiError::Store(_) => "Storage error".to_string(),
            other => other.to_string(),
        };
        let mut body = json!({
            "error": message,
            "status": status.as_u16(),
        });
        if let ApiError::Commit(err) = &self {
            if let Some(pending) = err.pending_commit() {
                body["pending"] = json!(pending);
            }
            if let Some(orphaned) = err.orphaned_artifact() {
                body["orphaned_artifact"] = json!(orphaned);
            }
        }

        (status, Json(body)).into_response()
    }
}
