//! Editing session over one document
//!
//! Holds the single pending annotation and the version it was placed on.
//! Committing hands a snapshot of the session to the [`Signer`].

use shared_pdf::SUPPORTED_PAGE_INDEX;
use shared_types::{Annotation, BoxSize, FontFamily, Rgb, ScreenPoint};
use tokio::sync::watch;

use crate::commit::{CancelToken, CommitRequest, CommitState, CommitTracker, Signer};
use crate::error::CommitError;
use crate::store::CommitReceipt;

pub struct SigningSession {
    document_id: String,
    actor: String,
    base_version: u32,
    page_index: u32,
    annotation: Option<Annotation>,
    /// Last removed annotation, for undo
    removed: Option<Annotation>,
    tracker: CommitTracker,
}

impl SigningSession {
    /// Start editing `document_id` as `actor` on top of `base_version`
    pub fn new(document_id: &str, actor: &str, base_version: u32) -> Self {
        Self {
            document_id: document_id.to_string(),
            actor: actor.to_string(),
            base_version,
            page_index: SUPPORTED_PAGE_INDEX,
            annotation: None,
            removed: None,
            tracker: CommitTracker::new(),
        }
    }

    /// Open a session on the latest version of a document
    pub async fn open(signer: &Signer, document_id: &str, actor: &str) -> Result<Self, CommitError> {
        let latest = signer.latest_version(document_id).await?;
        Ok(Self::new(document_id, actor, latest.version_number))
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn base_version(&self) -> u32 {
        self.base_version
    }

    pub fn annotation(&self) -> Option<&Annotation> {
        self.annotation.as_ref()
    }

    pub fn state(&self) -> CommitState {
        self.tracker.state()
    }

    /// Observe the state of the current (or last) commit attempt
    pub fn subscribe(&self) -> watch::Receiver<CommitState> {
        self.tracker.subscribe()
    }

    pub fn set_page_index(&mut self, page_index: u32) {
        self.page_index = page_index;
    }

    /// Place a new annotation with the editor defaults, replacing any
    /// existing one
    pub fn add_annotation(&mut self) -> &mut Annotation {
        self.removed = None;
        self.annotation.insert(Annotation::default())
    }

    pub fn place(&mut self, annotation: Annotation) {
        self.removed = None;
        self.annotation = Some(annotation);
    }

    pub fn move_by(&mut self, dx: f64, dy: f64) {
        if let Some(annotation) = self.annotation.as_mut() {
            annotation.move_by(dx, dy);
        }
    }

    pub fn move_to(&mut self, position: ScreenPoint) {
        if let Some(annotation) = self.annotation.as_mut() {
            annotation.position = position;
        }
    }

    pub fn resize(&mut self, size: BoxSize) {
        if let Some(annotation) = self.annotation.as_mut() {
            annotation.size = size;
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        if let Some(annotation) = self.annotation.as_mut() {
            annotation.text = text.into();
        }
    }

    pub fn set_color(&mut self, color: Rgb) {
        if let Some(annotation) = self.annotation.as_mut() {
            annotation.color = color;
        }
    }

    pub fn set_font_family(&mut self, font_family: FontFamily) {
        if let Some(annotation) = self.annotation.as_mut() {
            annotation.font_family = font_family;
        }
    }

    pub fn set_font_size(&mut self, font_size: f64) {
        if let Some(annotation) = self.annotation.as_mut() {
            annotation.font_size = font_size;
        }
    }

    pub fn remove_annotation(&mut self) -> Option<Annotation> {
        let removed = self.annotation.take();
        if removed.is_some() {
            self.removed = removed.clone();
        }
        removed
    }

    /// Undo the last removal. Returns false if there is nothing to restore.
    pub fn restore_annotation(&mut self) -> bool {
        match self.removed.take() {
            Some(annotation) if self.annotation.is_none() => {
                self.annotation = Some(annotation);
                true
            }
            Some(annotation) => {
                self.removed = Some(annotation);
                false
            }
            None => false,
        }
    }

    /// Commit the pending annotation.
    ///
    /// On success the annotation is discarded and the session continues on
    /// the new version. On failure the annotation is kept for a retry.
    pub async fn commit(
        &mut self,
        signer: &Signer,
        cancel: &CancelToken,
    ) -> Result<CommitReceipt, CommitError> {
        // A dropped commit keeps writing in the background
        let state = self.tracker.state();
        if state.is_writing() {
            return Err(CommitError::InProgress(format!(
                "document {} is {:?}",
                self.document_id, state
            )));
        }

        let request = CommitRequest {
            document_id: self.document_id.clone(),
            actor: self.actor.clone(),
            annotation: self.annotation.clone(),
            page_index: self.page_index,
            base_version: Some(self.base_version),
        };
        self.tracker = CommitTracker::new();

        let receipt = signer
            .commit_tracked(request, cancel, self.tracker.clone())
            .await?;
        self.annotation = None;
        self.removed = None;
        self.base_version = receipt.version.version_number;
        Ok(receipt)
    }
}
