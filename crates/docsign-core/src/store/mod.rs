//! Storage seams for artifacts and document records
//!
//! Artifacts live in a write-once [`BlobStore`]. Documents, their version
//! chain and audit log live in a [`DocumentStore`], whose
//! [`commit_signed_version`](DocumentStore::commit_signed_version) applies
//! the version insert, status update and audit entry as one atomic unit.

mod memory;

pub use memory::{InMemoryBlobStore, InMemoryDocumentStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{
    ArtifactPointer, AuditLogEntry, Document, DocumentStatus, DocumentVersion,
};
use std::time::Duration;

use crate::error::StoreError;

/// Details recorded on the CREATED entry of a freshly uploaded document
pub fn created_details(title: &str) -> String {
    format!("Uploaded {}", title)
}

/// Write-once binary artifact storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `pointer`. Fails with
    /// [`StoreError::PointerInUse`] if the pointer already holds an artifact.
    async fn put(
        &self,
        pointer: &ArtifactPointer,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn get(&self, pointer: &ArtifactPointer) -> Result<Vec<u8>, StoreError>;

    async fn exists(&self, pointer: &ArtifactPointer) -> Result<bool, StoreError>;

    /// Time-limited download URL for an artifact
    async fn signed_url(
        &self,
        pointer: &ArtifactPointer,
        ttl: Duration,
    ) -> Result<String, StoreError>;
}

/// The single write that closes a signing commit. Recorded with
/// [`DocumentStore::record_pending`] before its artifact is uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedCommit {
    pub document_id: String,
    /// Version number the commit was composited against
    pub expected_previous: u32,
    pub artifact_pointer: ArtifactPointer,
    pub created_by: String,
    pub audit_details: String,
}

/// Result of applying a [`SignedCommit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub version: DocumentVersion,
    pub status: DocumentStatus,
    pub audit_entry: AuditLogEntry,
    /// The commit had already been applied; nothing new was written
    pub replayed: bool,
}

/// Document, version and audit records
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a draft document, its first version and the CREATED entry
    /// atomically
    async fn create_document(
        &self,
        document: &Document,
        first_version: &DocumentVersion,
    ) -> Result<AuditLogEntry, StoreError>;

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, StoreError>;

    /// Documents owned by `owner`, newest first
    async fn list_documents(&self, owner: &str) -> Result<Vec<Document>, StoreError>;

    async fn latest_version(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError>;

    /// Version chain in ascending order
    async fn versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, StoreError>;

    async fn version_by_pointer(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<DocumentVersion>, StoreError>;

    /// Audit entries in chronological order
    async fn audit_log(&self, document_id: &str) -> Result<Vec<AuditLogEntry>, StoreError>;

    /// Remember a commit, keyed by its artifact pointer, before the artifact
    /// is uploaded. Fails with [`StoreError::PointerInUse`] if the pointer
    /// was already recorded.
    async fn record_pending(&self, commit: &SignedCommit) -> Result<(), StoreError>;

    /// The commit recorded for `pointer`, whether or not it was applied
    async fn pending_commit(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<SignedCommit>, StoreError>;

    /// Atomically append version `expected_previous + 1`, move the status
    /// forward and record the SIGNED entry.
    ///
    /// Fails with [`StoreError::VersionConflict`] if the latest version is
    /// no longer `expected_previous`. Applying a commit whose pointer is
    /// already recorded for the same document returns the existing receipt
    /// with `replayed` set.
    async fn commit_signed_version(&self, commit: &SignedCommit)
        -> Result<CommitReceipt, StoreError>;
}
