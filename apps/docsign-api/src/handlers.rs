//! HTTP handlers for DocSign API

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use docsign_core::{
    ArtifactPointer, BlobStore, CancelToken, CommitRequest, Document, DocumentVersion,
};
use std::sync::Arc;

use crate::blobs::{is_safe_segment, LinkStatus};
use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

async fn document_response(
    state: &AppState,
    document: Document,
) -> Result<DocumentResponse, ApiError> {
    let latest_version = state.signer.latest_version(&document.id).await?;
    let download_url = state
        .signer
        .latest_download_url(&document.id, None)
        .await?;
    Ok(DocumentResponse {
        document,
        latest_version,
        download_url,
    })
}

/// Upload a PDF as a new draft document
pub async fn create_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    if !is_safe_segment(&req.owner) {
        return Err(ApiError::InvalidRequest(format!(
            "Owner may only contain letters, digits, '.', '_', '-' and '@': {}",
            req.owner
        )));
    }
    let pdf_data = BASE64
        .decode(&req.pdf_base64)
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid PDF base64: {}", e)))?;

    let receipt = state
        .signer
        .upload_document(&req.owner, &req.title, pdf_data)
        .await?;

    let response = document_response(&state, receipt.document).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// List an owner's documents, newest first
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.signer.list_documents(&query.owner).await?))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = state.signer.document(&id).await?;
    Ok(Json(document_response(&state, document).await?))
}

/// Version chain, oldest first
pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DocumentVersion>>, ApiError> {
    Ok(Json(state.signer.versions(&id).await?))
}

pub async fn get_audit_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AuditResponse>, ApiError> {
    let trail = state.signer.audit_trail(&id).await?;
    let verified = match trail.verify() {
        Ok(()) => true,
        Err(reason) => {
            tracing::warn!(document_id = %id, %reason, "Audit chain failed verification");
            false
        }
    };
    Ok(Json(AuditResponse {
        document_id: id,
        verified,
        entries: trail.newest_first().cloned().collect(),
    }))
}

/// Burn an annotation into a new version of the document
pub async fn sign_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let annotation = req
        .annotation
        .map(AnnotationInput::into_annotation)
        .transpose()
        .map_err(ApiError::InvalidRequest)?;
    let request = CommitRequest {
        document_id: id,
        actor: req.actor,
        annotation,
        page_index: req.page_index,
        base_version: req.base_version,
    };

    let receipt = state.signer.commit(request, &CancelToken::new()).await?;
    let download_url = state
        .blobs
        .signed_url(
            &receipt.version.artifact_pointer,
            state.signer.config().signed_url_ttl(),
        )
        .await?;

    Ok(Json(SignResponse::new(receipt, download_url)))
}

/// Settle a commit that failed after upload
pub async fn reconcile_commit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let outcome = state.signer.reconcile(&id, &req.artifact_pointer).await?;
    Ok(Json(outcome.into()))
}

/// Serve an artifact behind a signed link
pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path(pointer): Path<String>,
    Query(query): Query<BlobQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match state
        .blobs
        .check_link(&pointer, query.expires, &query.sig, Utc::now().timestamp())
    {
        LinkStatus::Valid => {}
        LinkStatus::Expired => return Err(ApiError::LinkExpired),
        LinkStatus::BadSignature => return Err(ApiError::InvalidLink),
    }

    let pointer = ArtifactPointer::new(pointer);
    let bytes = state.blobs.get(&pointer).await?;
    let filename = pointer
        .as_str()
        .rsplit('/')
        .next()
        .unwrap_or("document.pdf")
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                state.config.signing.artifact_content_type.clone(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    ))
}
