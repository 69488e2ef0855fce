use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("unknown document status: {0}")]
    Unknown(String),

    #[error("status cannot move from {from} to {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Rejected => "rejected",
        }
    }

    /// Status after a successful signing commit.
    ///
    /// Completed documents stay completed; rejected documents cannot be signed.
    pub fn after_signing(self) -> Result<DocumentStatus, StatusError> {
        match self {
            DocumentStatus::Draft | DocumentStatus::Completed => Ok(DocumentStatus::Completed),
            DocumentStatus::Rejected => Err(StatusError::InvalidTransition {
                from: self,
                to: DocumentStatus::Completed,
            }),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "completed" => Ok(DocumentStatus::Completed),
            "rejected" => Ok(DocumentStatus::Rejected),
            other => Err(StatusError::Unknown(other.to_string())),
        }
    }
}

/// Opaque, write-once key of an artifact in blob storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactPointer(String);

impl ArtifactPointer {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Fresh pointer for an uploaded original, e.g. `owner/1700000000000-a1b2c3.pdf`
    pub fn for_upload(owner: &str) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}/{}-{}.pdf",
            owner,
            Utc::now().timestamp_millis(),
            &nonce[..8]
        ))
    }

    /// Fresh pointer for a signed artifact of `document_id`
    pub fn for_signed(owner: &str, document_id: &str) -> Self {
        Self(format!(
            "{}/{}/{}-signed.pdf",
            owner,
            document_id,
            Uuid::new_v4()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner: String,
    pub title: String,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// A freshly uploaded document, always in draft
    pub fn new_draft(owner: &str, title: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            title: title.to_string(),
            status: DocumentStatus::Draft,
            created_at: Utc::now(),
        }
    }
}

/// One immutable entry of a document's version chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: String,
    pub version_number: u32,
    pub artifact_pointer: ArtifactPointer,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentVersion {
    pub fn first(document_id: &str, artifact_pointer: ArtifactPointer, created_by: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            version_number: 1,
            artifact_pointer,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        }
    }

    /// The version that would follow this one
    pub fn successor(&self, artifact_pointer: ArtifactPointer, created_by: &str) -> Self {
        Self {
            document_id: self.document_id.clone(),
            version_number: self.version_number + 1,
            artifact_pointer,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        }
    }
}
