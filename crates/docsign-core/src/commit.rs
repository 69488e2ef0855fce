//! The commit protocol
//!
//! A commit turns a pending [`Annotation`] into a new immutable version:
//!
//! ```text
//! Drafting -> Compositing -> Uploading -> Persisting -> Committed
//!     \            \              \            \
//!      +------------+--------------+------------+----> Failed
//! ```
//!
//! Everything up to and including `Compositing` is side-effect free and can
//! be cancelled. From `Uploading` on, the work runs in its own task and is
//! carried to a terminal state even if the caller stops waiting.

use serde::{Deserialize, Serialize};
use shared_pdf::{screen_to_pdf, PdfDocument, PdfPlacement, TextStamp};
use shared_types::{
    Annotation, ArtifactPointer, AuditLogEntry, AuditTrail, Document, DocumentVersion,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::SigningConfig;
use crate::error::{CommitError, StoreError};
use crate::store::{BlobStore, CommitReceipt, DocumentStore, SignedCommit};

/// Progress of a single commit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Drafting,
    Compositing,
    Uploading,
    Persisting,
    Committed,
    Failed,
}

impl CommitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommitState::Committed | CommitState::Failed)
    }

    /// True while the external write phase may be running
    pub fn is_writing(self) -> bool {
        matches!(self, CommitState::Uploading | CommitState::Persisting)
    }

    pub fn can_advance_to(self, next: CommitState) -> bool {
        use CommitState::*;
        matches!(
            (self, next),
            (Drafting, Compositing)
                | (Compositing, Uploading)
                | (Uploading, Persisting)
                | (Persisting, Committed)
                | (Drafting | Compositing | Uploading | Persisting, Failed)
        )
    }
}

/// Publishes the state of one commit attempt to any number of observers
#[derive(Debug, Clone)]
pub struct CommitTracker {
    tx: Arc<watch::Sender<CommitState>>,
}

impl CommitTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CommitState::Drafting);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> CommitState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CommitState> {
        self.tx.subscribe()
    }

    fn advance(&self, document_id: &str, next: CommitState) {
        let current = self.state();
        if !current.can_advance_to(next) {
            warn!(document_id, ?current, ?next, "Ignoring illegal commit transition");
            return;
        }
        debug!(document_id, from = ?current, to = ?next, "Commit state");
        self.tx.send_replace(next);
    }
}

impl Default for CommitTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation, honoured until the upload starts
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A commit whose artifact is (or may be) uploaded but whose version is
/// not confirmed. The server keeps its own copy, keyed by artifact pointer.
pub type PendingCommit = SignedCommit;

/// Input of one commit attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub document_id: String,
    /// Acting user, recorded as the version's author
    pub actor: String,
    pub annotation: Option<Annotation>,
    #[serde(default)]
    pub page_index: u32,
    /// Version the annotation was placed on. When absent, the latest version
    /// at compositing time is used.
    #[serde(default)]
    pub base_version: Option<u32>,
}

/// How a [`PendingCommit`] was settled
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The version was already recorded
    AlreadyCommitted(DocumentVersion),
    /// The missing version write was applied now
    Completed(CommitReceipt),
    /// The artifact never reached the blob store; nothing to undo
    NotUploaded,
    /// The document moved on; the artifact is unreferenced
    Orphaned(ArtifactPointer),
}

/// Result of registering a new document
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub document: Document,
    pub version: DocumentVersion,
    pub audit_entry: AuditLogEntry,
}

/// Composited artifact waiting for the write phase
struct Prepared {
    pending: PendingCommit,
    bytes: Vec<u8>,
}

/// Runs commits and the document operations around them
#[derive(Clone)]
pub struct Signer {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    config: SigningConfig,
}

impl Signer {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        config: SigningConfig,
    ) -> Self {
        Self {
            documents,
            blobs,
            config,
        }
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Store an uploaded PDF as version 1 of a new draft document
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_document(
        &self,
        owner: &str,
        title: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt, CommitError> {
        if owner.trim().is_empty() {
            return Err(CommitError::Validation("owner must not be empty".into()));
        }
        if title.trim().is_empty() {
            return Err(CommitError::Validation("title must not be empty".into()));
        }
        if PdfDocument::from_bytes(&bytes)?.page_count() == 0 {
            return Err(CommitError::Format("document has no pages".into()));
        }

        let pointer = ArtifactPointer::for_upload(owner);
        self.blobs
            .put(&pointer, bytes, &self.config.artifact_content_type)
            .await
            .map_err(|source| CommitError::Storage {
                source,
                orphaned: Some(pointer.clone()),
            })?;

        let document = Document::new_draft(owner, title);
        let version = DocumentVersion::first(&document.id, pointer.clone(), owner);
        let audit_entry = self
            .documents
            .create_document(&document, &version)
            .await
            .map_err(|source| CommitError::Storage {
                source,
                orphaned: Some(pointer),
            })?;

        info!(document_id = %document.id, pointer = %version.artifact_pointer, "Document uploaded");
        Ok(UploadReceipt {
            document,
            version,
            audit_entry,
        })
    }

    pub async fn document(&self, document_id: &str) -> Result<Document, CommitError> {
        self.documents
            .get_document(document_id)
            .await
            .map_err(CommitError::read)?
            .ok_or_else(|| CommitError::NotFound(document_id.to_string()))
    }

    pub async fn list_documents(&self, owner: &str) -> Result<Vec<Document>, CommitError> {
        self.documents
            .list_documents(owner)
            .await
            .map_err(CommitError::read)
    }

    /// Version chain, oldest first
    pub async fn versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>, CommitError> {
        self.document(document_id).await?;
        self.documents
            .versions(document_id)
            .await
            .map_err(CommitError::read)
    }

    pub async fn latest_version(&self, document_id: &str) -> Result<DocumentVersion, CommitError> {
        self.documents
            .latest_version(document_id)
            .await
            .map_err(CommitError::read)?
            .ok_or_else(|| CommitError::NotFound(document_id.to_string()))
    }

    pub async fn audit_trail(&self, document_id: &str) -> Result<AuditTrail, CommitError> {
        self.document(document_id).await?;
        let entries = self
            .documents
            .audit_log(document_id)
            .await
            .map_err(CommitError::read)?;
        Ok(AuditTrail::from_entries(document_id, entries))
    }

    /// Time-limited URL of the latest version's artifact
    pub async fn latest_download_url(
        &self,
        document_id: &str,
        ttl: Option<Duration>,
    ) -> Result<String, CommitError> {
        let latest = self.latest_version(document_id).await?;
        self.blobs
            .signed_url(
                &latest.artifact_pointer,
                ttl.unwrap_or_else(|| self.config.signed_url_ttl()),
            )
            .await
            .map_err(CommitError::read)
    }

    /// Run a commit to completion
    pub async fn commit(
        &self,
        request: CommitRequest,
        cancel: &CancelToken,
    ) -> Result<CommitReceipt, CommitError> {
        self.commit_tracked(request, cancel, CommitTracker::new())
            .await
    }

    /// Run a commit, publishing each state change through `tracker`
    #[instrument(skip_all, fields(document_id = %request.document_id, actor = %request.actor))]
    pub async fn commit_tracked(
        &self,
        request: CommitRequest,
        cancel: &CancelToken,
        tracker: CommitTracker,
    ) -> Result<CommitReceipt, CommitError> {
        let document_id = request.document_id.clone();

        let prepared = match self.prepare(&request, cancel, &tracker).await {
            Ok(prepared) => prepared,
            Err(err) => {
                debug!(%err, "Commit failed before upload");
                tracker.advance(&document_id, CommitState::Failed);
                return Err(err);
            }
        };
        if cancel.is_cancelled() {
            tracker.advance(&document_id, CommitState::Failed);
            return Err(CommitError::Cancelled);
        }

        tracker.advance(&document_id, CommitState::Uploading);
        let pending = prepared.pending.clone();
        let task = tokio::spawn(publish(
            self.documents.clone(),
            self.blobs.clone(),
            self.config.artifact_content_type.clone(),
            prepared,
            tracker.clone(),
        ));

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                tracker.advance(&document_id, CommitState::Failed);
                Err(CommitError::Persistence {
                    pending,
                    reason: format!("write task aborted: {}", join_err),
                })
            }
        }
    }

    /// Drafting and Compositing: everything that has no external effect
    async fn prepare(
        &self,
        request: &CommitRequest,
        cancel: &CancelToken,
        tracker: &CommitTracker,
    ) -> Result<Prepared, CommitError> {
        if cancel.is_cancelled() {
            return Err(CommitError::Cancelled);
        }
        let annotation = request
            .annotation
            .as_ref()
            .ok_or_else(|| CommitError::Validation("no annotation to commit".into()))?;
        annotation
            .validate_text()
            .map_err(|msg| CommitError::Validation(msg.to_string()))?;
        if !annotation.color.is_valid() {
            return Err(CommitError::Validation(
                "color channels must be within 0..=1".into(),
            ));
        }

        tracker.advance(&request.document_id, CommitState::Compositing);

        let document = self.document(&request.document_id).await?;
        if let Err(err) = document.status.after_signing() {
            return Err(CommitError::Validation(err.to_string()));
        }
        let base = self.latest_version(&request.document_id).await?;
        if let Some(expected) = request.base_version {
            if expected != base.version_number {
                return Err(CommitError::Concurrency {
                    document_id: request.document_id.clone(),
                    expected,
                    actual: base.version_number,
                    orphaned: None,
                });
            }
        }

        let base_bytes = self
            .blobs
            .get(&base.artifact_pointer)
            .await
            .map_err(CommitError::read)?;
        let mut pdf = PdfDocument::from_bytes(&base_bytes)?;
        let media_box = pdf.media_box(request.page_index)?;
        let placement = screen_to_pdf(
            annotation,
            request.page_index,
            self.config.render_width,
            media_box,
            self.config.font_size_bounds(),
        )?;
        pdf.burn_text(&TextStamp {
            page_index: request.page_index,
            placement,
            text: &annotation.text,
            color: annotation.color,
            font: annotation.font_family,
        })?;
        let bytes = pdf.save_to_bytes()?;

        debug!(
            base_version = base.version_number,
            x = placement.x,
            y = placement.y,
            size = bytes.len(),
            "Composited annotation"
        );

        Ok(Prepared {
            pending: PendingCommit {
                document_id: request.document_id.clone(),
                expected_previous: base.version_number,
                artifact_pointer: ArtifactPointer::for_signed(&request.actor, &request.document_id),
                created_by: request.actor.clone(),
                audit_details: signed_details(
                    base.version_number + 1,
                    request.page_index,
                    annotation,
                    &placement,
                ),
            },
            bytes,
        })
    }

    /// Settle a commit that failed after its artifact pointer was handed
    /// out, e.g. with [`CommitError::Persistence`].
    ///
    /// Only the commit recorded on this side is replayed, so an artifact
    /// composited against an older version can never land on a newer one.
    #[instrument(skip(self, pointer), fields(pointer = %pointer))]
    pub async fn reconcile(
        &self,
        document_id: &str,
        pointer: &ArtifactPointer,
    ) -> Result<Reconciliation, CommitError> {
        let recorded = self
            .documents
            .version_by_pointer(pointer)
            .await
            .map_err(CommitError::read)?;
        if let Some(version) = recorded {
            if version.document_id == document_id {
                info!(version = version.version_number, "Commit was already recorded");
                return Ok(Reconciliation::AlreadyCommitted(version));
            }
        }

        let pending = self
            .documents
            .pending_commit(pointer)
            .await
            .map_err(CommitError::read)?
            .filter(|pending| pending.document_id == document_id)
            .ok_or_else(|| {
                CommitError::Validation(format!(
                    "no pending commit for {} on document {}",
                    pointer, document_id
                ))
            })?;

        let uploaded = self.blobs.exists(pointer).await.map_err(CommitError::read)?;
        if !uploaded {
            info!("Artifact never uploaded");
            return Ok(Reconciliation::NotUploaded);
        }

        match self.documents.commit_signed_version(&pending).await {
            Ok(receipt) if receipt.replayed => Ok(Reconciliation::AlreadyCommitted(receipt.version)),
            Ok(receipt) => {
                info!(version = receipt.version.version_number, "Completed pending commit");
                Ok(Reconciliation::Completed(receipt))
            }
            Err(StoreError::VersionConflict {
                expected, actual, ..
            }) => {
                warn!(expected, actual, "Document moved on, artifact left unreferenced");
                Ok(Reconciliation::Orphaned(pending.artifact_pointer))
            }
            Err(StoreError::Backend(reason)) => Err(CommitError::Persistence { pending, reason }),
            Err(source) => Err(CommitError::Storage {
                source,
                orphaned: Some(pending.artifact_pointer),
            }),
        }
    }
}

/// Uploading and Persisting. Runs detached from the caller.
async fn publish(
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    content_type: String,
    prepared: Prepared,
    tracker: CommitTracker,
) -> Result<CommitReceipt, CommitError> {
    let Prepared { pending, bytes } = prepared;
    let document_id = pending.document_id.clone();

    if let Err(source) = documents.record_pending(&pending).await {
        warn!(%document_id, pointer = %pending.artifact_pointer, %source, "Could not record pending commit");
        tracker.advance(&document_id, CommitState::Failed);
        return Err(CommitError::Storage {
            source,
            orphaned: None,
        });
    }

    if let Err(source) = blobs
        .put(&pending.artifact_pointer, bytes, &content_type)
        .await
    {
        warn!(%document_id, pointer = %pending.artifact_pointer, %source, "Upload failed");
        tracker.advance(&document_id, CommitState::Failed);
        return Err(CommitError::Storage {
            source,
            orphaned: Some(pending.artifact_pointer),
        });
    }

    tracker.advance(&document_id, CommitState::Persisting);
    match documents.commit_signed_version(&pending).await {
        Ok(receipt) => {
            tracker.advance(&document_id, CommitState::Committed);
            info!(
                %document_id,
                version = receipt.version.version_number,
                status = %receipt.status,
                pointer = %receipt.version.artifact_pointer,
                "Committed signed version"
            );
            Ok(receipt)
        }
        Err(StoreError::VersionConflict {
            expected, actual, ..
        }) => {
            warn!(%document_id, expected, actual, pointer = %pending.artifact_pointer, "Lost version race, artifact orphaned");
            tracker.advance(&document_id, CommitState::Failed);
            Err(CommitError::Concurrency {
                document_id,
                expected,
                actual,
                orphaned: Some(pending.artifact_pointer),
            })
        }
        Err(StoreError::Backend(reason)) => {
            warn!(%document_id, pointer = %pending.artifact_pointer, %reason, "Version write unconfirmed");
            tracker.advance(&document_id, CommitState::Failed);
            Err(CommitError::Persistence { pending, reason })
        }
        Err(source) => {
            warn!(%document_id, pointer = %pending.artifact_pointer, %source, "Version write rejected, artifact orphaned");
            tracker.advance(&document_id, CommitState::Failed);
            Err(CommitError::Storage {
                source,
                orphaned: Some(pending.artifact_pointer),
            })
        }
    }
}

/// Details of the SIGNED audit entry
fn signed_details(
    version_number: u32,
    page_index: u32,
    annotation: &Annotation,
    placement: &PdfPlacement,
) -> String {
    format!(
        "Signed version {} on page {} at ({:.2}, {:.2}) in {} {:.2}pt",
        version_number,
        page_index + 1,
        placement.x,
        placement.y,
        annotation.font_family.as_str(),
        placement.font_size
    )
}
