pub mod annotation;
pub mod audit;
pub mod types;

pub use annotation::{Annotation, BoxSize, FontFamily, FontSizeBounds, Rgb, ScreenPoint};
pub use audit::{AuditAction, AuditLogEntry, AuditTrail};
pub use types::{ArtifactPointer, Document, DocumentStatus, DocumentVersion, StatusError};
