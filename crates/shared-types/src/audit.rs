//! Tamper-evident audit log for document events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// First artifact uploaded, document created as draft
    Created,
    /// Annotation burned into a new version
    Signed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "CREATED",
            AuditAction::Signed => "SIGNED",
        }
    }

    pub fn parse(s: &str) -> Option<AuditAction> {
        match s {
            "CREATED" => Some(AuditAction::Created),
            "SIGNED" => Some(AuditAction::Signed),
            _ => None,
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: String,
    pub document_id: String,
    /// Position in the document's log, starting at 1
    pub sequence: u64,
    pub action: AuditAction,
    /// Version created by this event, if any
    #[serde(default)]
    pub version_number: Option<u32>,
    pub details: String,
    pub created_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditLogEntry {
    /// Create the entry that follows `previous` in a document's log
    pub fn next(
        previous: Option<&AuditLogEntry>,
        document_id: &str,
        action: AuditAction,
        version_number: Option<u32>,
        details: impl Into<String>,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            sequence: previous.map_or(1, |p| p.sequence + 1),
            action,
            version_number,
            details: details.into(),
            created_at: Utc::now(),
            previous_hash: previous.map(|p| p.entry_hash.clone()),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    /// Compute the hash of this entry (for chain linking)
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.document_id.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.action.as_str().as_bytes());
        if let Some(version) = self.version_number {
            hasher.update(version.to_be_bytes());
        }
        hasher.update(self.details.as_bytes());
        hasher.update(self.created_at.timestamp_millis().to_be_bytes());
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Ordered audit history of one document
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditTrail {
    pub document_id: String,
    pub entries: Vec<AuditLogEntry>,
}

impl AuditTrail {
    pub fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            entries: Vec::new(),
        }
    }

    /// Build a trail from stored entries, in chronological order
    pub fn from_entries(document_id: &str, mut entries: Vec<AuditLogEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence);
        Self {
            document_id: document_id.to_string(),
            entries,
        }
    }

    pub fn last(&self) -> Option<&AuditLogEntry> {
        self.entries.last()
    }

    /// Append an entry, linking it to the previous one
    pub fn append(
        &mut self,
        action: AuditAction,
        version_number: Option<u32>,
        details: impl Into<String>,
    ) -> &AuditLogEntry {
        let entry = AuditLogEntry::next(
            self.entries.last(),
            &self.document_id,
            action,
            version_number,
            details,
        );
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Verify sequence numbers and hash links
    pub fn verify(&self) -> Result<(), String> {
        let mut expected_prev: Option<&str> = None;

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.document_id != self.document_id {
                return Err(format!(
                    "Entry {} belongs to document {}, not {}",
                    i, entry.document_id, self.document_id
                ));
            }
            if entry.sequence != i as u64 + 1 {
                return Err(format!(
                    "Sequence gap at entry {}: expected {}, got {}",
                    i,
                    i + 1,
                    entry.sequence
                ));
            }
            if entry.previous_hash.as_deref() != expected_prev {
                return Err(format!(
                    "Chain broken at entry {}: expected prev {:?}, got {:?}",
                    i, expected_prev, entry.previous_hash
                ));
            }
            if entry.entry_hash != entry.compute_hash() {
                return Err(format!("Entry {} has been altered", i));
            }
            expected_prev = Some(&entry.entry_hash);
        }

        Ok(())
    }

    /// Entries in display order
    pub fn newest_first(&self) -> impl Iterator<Item = &AuditLogEntry> {
        self.entries.iter().rev()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// The SIGNED entry recorded for `version_number`
    pub fn signed_entry(&self, version_number: u32) -> Option<&AuditLogEntry> {
        self.entries
            .iter()
            .find(|e| e.action == AuditAction::Signed && e.version_number == Some(version_number))
    }
}
