//! Document signing core logic
//!
//! Burns a styled text annotation into a new immutable version of a PDF and
//! records it in the document's version chain and audit log.
//!
//! - [`SigningSession`] edits the single pending annotation
//! - [`Signer`] runs the commit protocol against a [`BlobStore`] and a
//!   [`DocumentStore`]
//! - [`store`] holds the storage seams and in-memory implementations

pub mod commit;
pub mod config;
pub mod error;
pub mod session;
pub mod store;

pub use commit::{
    CancelToken, CommitRequest, CommitState, CommitTracker, PendingCommit, Reconciliation,
    Signer, UploadReceipt,
};
pub use config::SigningConfig;
pub use error::{CommitError, StoreError};
pub use session::SigningSession;
pub use store::{
    BlobStore, CommitReceipt, DocumentStore, InMemoryBlobStore, InMemoryDocumentStore,
    SignedCommit,
};

// Re-export types from shared crates
pub use shared_pdf::{MediaBox, PdfPlacement, SUPPORTED_PAGE_INDEX};
pub use shared_types::{
    Annotation, ArtifactPointer, AuditAction, AuditLogEntry, AuditTrail, BoxSize, Document,
    DocumentStatus, DocumentVersion, FontFamily, Rgb, ScreenPoint,
};
