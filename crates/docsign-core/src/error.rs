//! Error taxonomy for stores and the commit protocol

use shared_pdf::PdfError;
use shared_types::{ArtifactPointer, StatusError};
use thiserror::Error;

use crate::commit::PendingCommit;

/// Failures reported by a [`crate::BlobStore`] or [`crate::DocumentStore`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(ArtifactPointer),

    #[error("artifact pointer already in use: {0}")]
    PointerInUse(ArtifactPointer),

    #[error("version conflict on {document_id}: expected latest {expected}, found {actual}")]
    VersionConflict {
        document_id: String,
        expected: u32,
        actual: u32,
    },

    #[error(transparent)]
    Status(#[from] StatusError),

    /// Transport or backend failure. The write may or may not have happened.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Failures of a signing commit and the surrounding document operations
#[derive(Debug, Clone, Error)]
pub enum CommitError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("annotation cannot be placed: {0}")]
    Placement(String),

    #[error("invalid PDF: {0}")]
    Format(String),

    #[error("page {index} is not available: {reason}")]
    PageIndex { index: u32, reason: String },

    #[error("font error: {0}")]
    Font(String),

    /// The base PDF parsed but the signed PDF could not be produced
    #[error("compositing failed: {0}")]
    Compositing(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("commit cancelled before upload")]
    Cancelled,

    #[error("a commit is already in progress ({0})")]
    InProgress(String),

    /// Another commit won the race for the next version number
    #[error("document {document_id} moved on: expected latest version {expected}, found {actual}")]
    Concurrency {
        document_id: String,
        expected: u32,
        actual: u32,
        orphaned: Option<ArtifactPointer>,
    },

    #[error("storage error: {source}")]
    Storage {
        source: StoreError,
        orphaned: Option<ArtifactPointer>,
    },

    /// The artifact was uploaded but its version could not be confirmed.
    /// Retry with [`crate::Signer::reconcile`].
    #[error("persisting {} failed: {reason}", .pending.artifact_pointer)]
    Persistence {
        pending: PendingCommit,
        reason: String,
    },
}

impl CommitError {
    /// True when the failure left nothing behind in any store
    pub fn is_clean(&self) -> bool {
        self.orphaned_artifact().is_none() && self.pending_commit().is_none()
    }

    /// Artifact uploaded by the failed commit that no version references
    pub fn orphaned_artifact(&self) -> Option<&ArtifactPointer> {
        match self {
            CommitError::Concurrency { orphaned, .. } | CommitError::Storage { orphaned, .. } => {
                orphaned.as_ref()
            }
            _ => None,
        }
    }

    pub fn pending_commit(&self) -> Option<&PendingCommit> {
        match self {
            CommitError::Persistence { pending, .. } => Some(pending),
            _ => None,
        }
    }

    /// Storage failure from a read, before anything was written
    pub(crate) fn read(source: StoreError) -> Self {
        match source {
            StoreError::DocumentNotFound(id) => CommitError::NotFound(id),
            source => CommitError::Storage {
                source,
                orphaned: None,
            },
        }
    }
}

impl From<PdfError> for CommitError {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::Format(msg) => CommitError::Format(msg),
            PdfError::Operation(msg) => CommitError::Compositing(msg),
            PdfError::PageIndex { index, reason } => CommitError::PageIndex { index, reason },
            PdfError::Font(msg) => CommitError::Font(msg),
            PdfError::Placement(msg) => CommitError::Placement(msg),
        }
    }
}
