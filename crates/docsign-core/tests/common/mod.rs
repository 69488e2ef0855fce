//! Shared fixtures for the commit protocol tests

#![allow(dead_code)]

use async_trait::async_trait;
use docsign_core::{
    ArtifactPointer, AuditLogEntry, BlobStore, CommitReceipt, Document, DocumentStatus,
    DocumentStore, DocumentVersion, InMemoryBlobStore, InMemoryDocumentStore, SignedCommit, Signer,
    SigningConfig, StoreError, UploadReceipt,
};
use lopdf::{dictionary, Dictionary, Document as LoDocument, Object, Stream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Letter-sized PDF with `pages` pages of body text
pub fn letter_pdf(pages: usize) -> Vec<u8> {
    let mut doc = LoDocument::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for n in 0..pages {
        let content = format!("BT /F1 12 Tf 72 720 Td (Lease page {}) Tj ET", n + 1);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => Object::Reference(content_id),
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// True if `needle` occurs anywhere in `haystack`
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Decoded content of the first page
pub fn first_page_content(pdf: &[u8]) -> Vec<u8> {
    let doc = LoDocument::load_mem(pdf).unwrap();
    let page_id = *doc.get_pages().get(&1).unwrap();
    doc.get_page_content(page_id).unwrap()
}

pub struct Harness {
    pub signer: Signer,
    pub blobs: Arc<InMemoryBlobStore>,
    pub documents: Arc<InMemoryDocumentStore>,
}

impl Harness {
    pub fn new() -> Self {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let signer = Signer::new(documents.clone(), blobs.clone(), SigningConfig::default());
        Self {
            signer,
            blobs,
            documents,
        }
    }

    pub async fn upload(&self, pages: usize) -> UploadReceipt {
        self.signer
            .upload_document("alice", "lease.pdf", letter_pdf(pages))
            .await
            .unwrap()
    }

    /// Register a one-page document straight in the stores, already in `status`
    pub async fn seed(&self, status: DocumentStatus) -> Document {
        let mut document = Document::new_draft("alice", "lease.pdf");
        document.status = status;
        let pointer = ArtifactPointer::for_upload("alice");
        self.blobs
            .put(&pointer, letter_pdf(1), "application/pdf")
            .await
            .unwrap();
        let first = DocumentVersion::first(&document.id, pointer, "alice");
        self.documents
            .create_document(&document, &first)
            .await
            .unwrap();
        document
    }
}

/// Blob store whose writes fail
pub struct FailingBlobStore {
    pub inner: Arc<InMemoryBlobStore>,
    pub fail_puts: AtomicBool,
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(
        &self,
        pointer: &ArtifactPointer,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("bucket unavailable".into()));
        }
        self.inner.put(pointer, bytes, content_type).await
    }

    async fn get(&self, pointer: &ArtifactPointer) -> Result<Vec<u8>, StoreError> {
        self.inner.get(pointer).await
    }

    async fn exists(&self, pointer: &ArtifactPointer) -> Result<bool, StoreError> {
        self.inner.exists(pointer).await
    }

    async fn signed_url(
        &self,
        pointer: &ArtifactPointer,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        self.inner.signed_url(pointer, ttl).await
    }
}

/// Blob store that holds every write until released
pub struct GatedBlobStore {
    pub inner: Arc<InMemoryBlobStore>,
    pub gate: Notify,
}

#[async_trait]
impl BlobStore for GatedBlobStore {
    async fn put(
        &self,
        pointer: &ArtifactPointer,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.gate.notified().await;
        self.inner.put(pointer, bytes, content_type).await
    }

    async fn get(&self, pointer: &ArtifactPointer) -> Result<Vec<u8>, StoreError> {
        self.inner.get(pointer).await
    }

    async fn exists(&self, pointer: &ArtifactPointer) -> Result<bool, StoreError> {
        self.inner.exists(pointer).await
    }

    async fn signed_url(
        &self,
        pointer: &ArtifactPointer,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        self.inner.signed_url(pointer, ttl).await
    }
}

/// How [`FlakyDocumentStore`] breaks the next signed commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flake {
    None,
    /// Fail before anything is written
    BeforeApply,
    /// Apply the commit, then lose the response
    AfterApply,
}

pub struct FlakyDocumentStore {
    pub inner: Arc<InMemoryDocumentStore>,
    pub flake: std::sync::Mutex<Flake>,
}

impl FlakyDocumentStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            inner,
            flake: std::sync::Mutex::new(Flake::None),
        }
    }

    pub fn arm(&self, flake: Flake) {
        *self.flake.lock().unwrap() = flake;
    }

    fn take(&self) -> Flake {
        std::mem::replace(&mut *self.flake.lock().unwrap(), Flake::None)
    }
}

#[async_trait]
impl DocumentStore for FlakyDocumentStore {
    async fn create_document(
        &self,
        document: &Document,
        first_version: &DocumentVersion,
    ) -> Result<AuditLogEntry, StoreError> {
        self.inner.create_document(document, first_version).await
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get_document(document_id).await
    }

    async fn list_documents(&self, owner: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list_documents(owner).await
    }

    async fn latest_version(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        self.inner.latest_version(document_id).await
    }

    async fn versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, StoreError> {
        self.inner.versions(document_id).await
    }

    async fn version_by_pointer(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        self.inner.version_by_pointer(pointer).await
    }

    async fn audit_log(&self, document_id: &str) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.inner.audit_log(document_id).await
    }

    async fn record_pending(&self, commit: &SignedCommit) -> Result<(), StoreError> {
        self.inner.record_pending(commit).await
    }

    async fn pending_commit(
        &self,
        pointer: &ArtifactPointer,
    ) -> Result<Option<SignedCommit>, StoreError> {
        self.inner.pending_commit(pointer).await
    }

    async fn commit_signed_version(
        &self,
        commit: &SignedCommit,
    ) -> Result<CommitReceipt, StoreError> {
        match self.take() {
            Flake::None => self.inner.commit_signed_version(commit).await,
            Flake::BeforeApply => Err(StoreError::Backend("connection reset".into())),
            Flake::AfterApply => {
                self.inner.commit_signed_version(commit).await?;
                Err(StoreError::Backend("response lost".into()))
            }
        }
    }
}
