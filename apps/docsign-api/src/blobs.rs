//! Filesystem blob store with signed download links

use async_trait::async_trait;
use chrono::Utc;
use docsign_core::{ArtifactPointer, BlobStore, StoreError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of checking a download link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Valid,
    Expired,
    BadSignature,
}

/// True for characters allowed in a pointer segment
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

/// Artifacts as files under `root`, one per pointer, never overwritten
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
    secret: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str, secret: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, pointer: &ArtifactPointer) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        for segment in pointer.as_str().split('/') {
            if !is_safe_segment(segment) {
                return Err(StoreError::Backend(format!(
                    "invalid artifact pointer: {}",
                    pointer
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// MAC over the pointer and expiry of a download link
    fn link_mac(&self, pointer: &str, expires: i64) -> Result<HmacSha256, StoreError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| StoreError::Backend(format!("HMAC error: {}", e)))?;
        mac.update(pointer.as_bytes());
        mac.update(b"\n");
        mac.update(&expires.to_be_bytes());
        Ok(mac)
    }

    fn signature(&self, pointer: &str, expires: i64) -> Result<String, StoreError> {
        let mac = self.link_mac(pointer, expires)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a link's signature and expiry at `now` (unix seconds)
    pub fn check_link(&self, pointer: &str, expires: i64, sig: &str, now: i64) -> LinkStatus {
        let Ok(claimed) = hex::decode(sig) else {
            return LinkStatus::BadSignature;
        };
        let verified = self
            .link_mac(pointer, expires)
            .is_ok_and(|mac| mac.verify_slice(&claimed).is_ok());
        if !verified {
            LinkStatus::BadSignature
        } else if expires < now {
            LinkStatus::Expired
        } else {
            LinkStatus::Valid
        }
    }
}

fn io_error(pointer: &ArtifactPointer, err: std::io::Error) -> StoreError {
    StoreError::Backend(format!("{}: {}", pointer, err))
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        pointer: &ArtifactPointer,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.path_for(pointer)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(pointer, e))?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::PointerInUse(pointer.clone()))
            }
            Err(e) => return Err(io_error(pointer, e)),
        };

        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            // Leave no partial artifact behind
            let _ = tokio::fs::remove_file(&path).await;
            return Err(io_error(pointer, e));
        }

        tracing::debug!(%pointer, size = bytes.len(), content_type, "Stored artifact");
        Ok(())
    }

    async fn get(&self, pointer: &ArtifactPointer) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(pointer)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::ArtifactNotFound(pointer.clone()))
            }
            Err(e) => Err(io_error(pointer, e)),
        }
    }

    async fn exists(&self, pointer: &ArtifactPointer) -> Result<bool, StoreError> {
        let path = self.path_for(pointer)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(pointer, e)),
        }
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
        Ok(format!(
            "{}/blobs/{}?expires={}&sig={}",
            self.public_base_url,
            pointer,
            expires,
            self.signature(pointer.as_str(), expires)?
        ))
    }
}
