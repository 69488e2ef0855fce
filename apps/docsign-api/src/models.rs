//! Data models for the DocSign API

use chrono::{DateTime, Utc};
use docsign_core::{
    Annotation, ArtifactPointer, AuditAction, AuditLogEntry, BoxSize, CommitReceipt, Document,
    DocumentStatus, DocumentVersion, FontFamily, Reconciliation, Rgb, ScreenPoint, SignedCommit,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Document row
#[derive(Debug, Clone, FromRow)]
pub struct DbDocument {
    pub id: String,
    pub owner: String,
    pub title: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbDocument> for Document {
    type Error = String;

    fn try_from(row: DbDocument) -> Result<Self, Self::Error> {
        Ok(Document {
            status: row.status.parse::<DocumentStatus>().map_err(|e| e.to_string())?,
            id: row.id,
            owner: row.owner,
            title: row.title,
            created_at: row.created_at,
        })
    }
}

/// Version row
#[derive(Debug, Clone, FromRow)]
pub struct DbVersion {
    pub document_id: String,
    pub version_number: i64,
    pub artifact_pointer: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbVersion> for DocumentVersion {
    type Error = String;

    fn try_from(row: DbVersion) -> Result<Self, Self::Error> {
        Ok(DocumentVersion {
            version_number: u32::try_from(row.version_number)
                .map_err(|_| format!("bad version number {}", row.version_number))?,
            document_id: row.document_id,
            artifact_pointer: ArtifactPointer::new(row.artifact_pointer),
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

/// Pending commit row
#[derive(Debug, Clone, FromRow)]
pub struct DbPendingCommit {
    pub artifact_pointer: String,
    pub document_id: String,
    pub expected_previous: i64,
    pub created_by: String,
    pub audit_details: String,
}

impl TryFrom<DbPendingCommit> for SignedCommit {
    type Error = String;

    fn try_from(row: DbPendingCommit) -> Result<Self, Self::Error> {
        Ok(SignedCommit {
            expected_previous: u32::try_from(row.expected_previous)
                .map_err(|_| format!("bad version number {}", row.expected_previous))?,
            document_id: row.document_id,
            artifact_pointer: ArtifactPointer::new(row.artifact_pointer),
            created_by: row.created_by,
            audit_details: row.audit_details,
        })
    }
}

/// Audit log row
#[derive(Debug, Clone, FromRow)]
pub struct DbAuditEntry {
    pub id: String,
    pub document_id: String,
    pub sequence: i64,
    pub action: String,
    pub version_number: Option<i64>,
    pub details: String,
    pub created_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl TryFrom<DbAuditEntry> for AuditLogEntry {
    type Error = String;

    fn try_from(row: DbAuditEntry) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action)
            .ok_or_else(|| format!("unknown audit action {}", row.action))?;
        let version_number = row
            .version_number
            .map(|n| u32::try_from(n).map_err(|_| format!("bad version number {}", n)))
            .transpose()?;
        Ok(AuditLogEntry {
            sequence: u64::try_from(row.sequence)
                .map_err(|_| format!("bad sequence {}", row.sequence))?,
            id: row.id,
            document_id: row.document_id,
            action,
            version_number,
            details: row.details,
            created_at: row.created_at,
            previous_hash: row.previous_hash,
            entry_hash: row.entry_hash,
        })
    }
}

/// Request to register a new document
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDocumentRequest {
    pub owner: String,
    pub title: String,
    pub pdf_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDocumentsQuery {
    pub owner: String,
}

/// A document with its latest version and a download link for it
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub document: Document,
    pub latest_version: DocumentVersion,
    pub download_url: String,
}

/// Annotation as sent by the editor. Missing fields take the editor defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotationInput {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    /// `#rrggbb`
    pub color: String,
    pub font_family: FontFamily,
    pub font_size: f64,
}

impl Default for AnnotationInput {
    fn default() -> Self {
        let defaults = Annotation::default();
        Self {
            x: defaults.position.x,
            y: defaults.position.y,
            width: defaults.size.width,
            height: defaults.size.height,
            text: defaults.text,
            color: "#000000".to_string(),
            font_family: defaults.font_family,
            font_size: defaults.font_size,
        }
    }
}

impl AnnotationInput {
    pub fn into_annotation(self) -> Result<Annotation, String> {
        let color =
            Rgb::from_hex(&self.color).ok_or_else(|| format!("Invalid color: {}", self.color))?;
        Ok(Annotation {
            position: ScreenPoint {
                x: self.x,
                y: self.y,
            },
            size: BoxSize {
                width: self.width,
                height: self.height,
            },
            text: self.text,
            color,
            font_family: self.font_family,
            font_size: self.font_size,
        })
    }
}

/// Request to burn an annotation into a new version
#[derive(Debug, Clone, Deserialize)]
pub struct SignRequest {
    pub actor: String,
    pub annotation: Option<AnnotationInput>,
    #[serde(default)]
    pub page_index: u32,
    /// Version the annotation was placed on
    #[serde(default)]
    pub base_version: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignResponse {
    pub version: DocumentVersion,
    pub status: DocumentStatus,
    pub audit_entry: AuditLogEntry,
    pub download_url: String,
}

impl SignResponse {
    pub fn new(receipt: CommitReceipt, download_url: String) -> Self {
        Self {
            version: receipt.version,
            status: receipt.status,
            audit_entry: receipt.audit_entry,
            download_url,
        }
    }
}

/// Audit history, newest first
#[derive(Debug, Clone, Serialize)]
pub struct AuditResponse {
    pub document_id: String,
    /// Sequence numbers and hash links check out
    pub verified: bool,
    pub entries: Vec<AuditLogEntry>,
}

/// Names the artifact of a failed commit; everything else comes from the
/// server's own record of that commit
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    pub artifact_pointer: ArtifactPointer,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileResponse {
    AlreadyCommitted { version: DocumentVersion },
    Completed { version: DocumentVersion, status: DocumentStatus },
    NotUploaded,
    Orphaned { artifact_pointer: ArtifactPointer },
}

impl From<Reconciliation> for ReconcileResponse {
    fn from(outcome: Reconciliation) -> Self {
        match outcome {
            Reconciliation::AlreadyCommitted(version) => {
                ReconcileResponse::AlreadyCommitted { version }
            }
            Reconciliation::Completed(receipt) => ReconcileResponse::Completed {
                version: receipt.version,
                status: receipt.status,
            },
            Reconciliation::NotUploaded => ReconcileResponse::NotUploaded,
            Reconciliation::Orphaned(artifact_pointer) => {
                ReconcileResponse::Orphaned { artifact_pointer }
            }
        }
    }
}

/// Query string of a signed download link
#[derive(Debug, Clone, Deserialize)]
pub struct BlobQuery {
    pub expires: i64,
    pub sig: String,
}
