//! In-process stores, used by tests and single-node setups

use async_trait::async_trait;
use chrono::Utc;
use shared_types::{
    ArtifactPointer, AuditAction, AuditLogEntry, Document, DocumentVersion,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{created_details, BlobStore, CommitReceipt, DocumentStore, SignedCommit};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

/// Blob store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<ArtifactPointer, StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn content_type(&self, pointer: &ArtifactPointer) -> Option<String> {
        self.blobs
            .read()
            .await
            .get(pointer)
            .map(|blob| blob.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        pointer: &ArtifactPointer,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write().await;
        if blobs.contains_key(pointer) {
            return Err(StoreError::PointerInUse(pointer.clone()));
        }
        blobs.insert(
            pointer.clone(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, pointer: &ArtifactPointer) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .await
            .get(pointer)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| StoreError::ArtifactNotFound(pointer.clone()))
    }

    async fn exists(&self, pointer: &ArtifactPointer) -> Result<bool, StoreError> {
        Ok(self.blobs.read().await.contains_key(pointer))
    }

    async fn signed_url(
        &self,
        pointer: &ArtifactPointer,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        if !self.exists(pointer).await? {
            return Err(StoreError::ArtifactNotFound(pointer.clone()));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("memory://{}?expires={}", pointer, expires))
    }
}

#[derive(Debug, Default)]
struct Records {
    documents: HashMap<String, Document>,
    versions: HashMap<String, Vec<DocumentVersion>>,
    audit: HashMap<String, Vec<AuditLogEntry>>,
    /// artifact pointer -> (document id, version number)
    pointers: HashMap<ArtifactPointer, (String, u32)>,
    pending: HashMap<ArtifactPointer, SignedCommit>,
}

/// Document store that applies every write under one lock
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    records: RwLock<Records>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_document(
        &self,
        document: &Document,
        first_version: &DocumentVersion,
    ) -> Result<AuditLogEntry, StoreError> {
        let mut records = self.records.write().await;
        if records.documents.contains_key(&document.id) {
            return Err(StoreError::Backend(format!(
                "document {} already exists",
                document.id
            )));
        }
        if records.pointers.contains_key(&first_version.artifact_pointer) {
            return Err(StoreError::PointerInUse(
                first_version.artifact_pointer.clone(),
            ));
        }

        let entry = AuditLogEntry::next(
            None,
            &document.id,
            AuditAction::Created,
            Some(first_version.version_number),
            created_details(&document.title),
        );
        records.documents.insert(document.id.clone(), document.clone());
        records
            .versions
            .insert(document.id.clone(), vec![first_version.clone()]);
        records.pointers.insert(
            first_version.artifact_pointer.clone(),
            (document.id.clone(), first_version.version_number),
        );
        records
            .audit
            .insert(document.id.clone(), vec![entry.clone()]);
        Ok(entry)
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.records.read().await.documents.get(document_id).cloned())
    }

    async fn list_documents(&self, owner: &str) -> Result<Vec<Document>, StoreError> {
        let records = self.records.read().await;
        let mut documents: Vec<Document> = records
            .documents
            .values()
            .filter(|d| d.owner == owner)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(documents)
    }

    async fn latest_version(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .versions
            .get(document_id)
            .and_then(|versions| versions.last())
            .cloned())
    }

    async fn versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, StoreError> {
        let records = self.records.read().await;
        Ok(records.versions.get(document_id).cloned().unwrap_or_default())
    }

    async fn version_by_pointer(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .pointers
            .get(pointer)
            .and_then(|(document_id, number)| {
                records
                    .versions
                    .get(document_id)?
                    .iter()
                    .find(|v| v.version_number == *number)
            })
            .cloned())
    }

    async fn audit_log(&self, document_id: &str) -> Result<Vec<AuditLogEntry>, StoreError> {
        let records = self.records.read().await;
        Ok(records.audit.get(document_id).cloned().unwrap_or_default())
    }

    async fn record_pending(&self, commit: &SignedCommit) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if !records.documents.contains_key(&commit.document_id) {
            return Err(StoreError::DocumentNotFound(commit.document_id.clone()));
        }
        if records.pending.contains_key(&commit.artifact_pointer)
            || records.pointers.contains_key(&commit.artifact_pointer)
        {
            return Err(StoreError::PointerInUse(commit.artifact_pointer.clone()));
        }
        records
            .pending
            .insert(commit.artifact_pointer.clone(), commit.clone());
        Ok(())
    }

    async fn pending_commit(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<SignedCommit>, StoreError> {
        Ok(self.records.read().await.pending.get(pointer).cloned())
    }

    async fn commit_signed_version(
        &self,
        commit: &SignedCommit,
    ) -> Result<CommitReceipt, StoreError> {
        let mut records = self.records.write().await;
        let Records {
            documents,
            versions,
            audit,
            pointers,
            ..
        } = &mut *records;

        let document = documents
            .get_mut(&commit.document_id)
            .ok_or_else(|| StoreError::DocumentNotFound(commit.document_id.clone()))?;
        let chain = versions.entry(commit.document_id.clone()).or_default();
        let log = audit.entry(commit.document_id.clone()).or_default();

        if let Some((owner_id, number)) = pointers.get(&commit.artifact_pointer) {
            let replay = (owner_id == &commit.document_id)
                .then(|| {
                    let version = chain.iter().find(|v| v.version_number == *number)?;
                    let entry = log.iter().find(|e| {
                        e.action == AuditAction::Signed && e.version_number == Some(*number)
                    })?;
                    Some((version.clone(), entry.clone()))
                })
                .flatten();
            return match replay {
                Some((version, audit_entry)) => Ok(CommitReceipt {
                    version,
                    status: document.status,
                    audit_entry,
                    replayed: true,
                }),
                None => Err(StoreError::PointerInUse(commit.artifact_pointer.clone())),
            };
        }

        let actual = chain.last().map_or(0, |v| v.version_number);
        if actual != commit.expected_previous {
            return Err(StoreError::VersionConflict {
                document_id: commit.document_id.clone(),
                expected: commit.expected_previous,
                actual,
            });
        }
        let status = document.status.after_signing()?;

        let previous = chain.last().ok_or_else(|| {
            StoreError::Backend(format!("document {} has no versions", commit.document_id))
        })?;
        let version = previous.successor(commit.artifact_pointer.clone(), &commit.created_by);
        let entry = AuditLogEntry::next(
            log.last(),
            &commit.document_id,
            AuditAction::Signed,
            Some(version.version_number),
            commit.audit_details.clone(),
        );

        document.status = status;
        chain.push(version.clone());
        log.push(entry.clone());
        pointers.insert(
            commit.artifact_pointer.clone(),
            (commit.document_id.clone(), version.version_number),
        );

        Ok(CommitReceipt {
            version,
            status,
            audit_entry: entry,
            replayed: false,
        })
    }
}
