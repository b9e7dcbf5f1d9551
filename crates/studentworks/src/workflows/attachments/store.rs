use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::domain::{AttachmentContent, AttachmentId, AttachmentRef, Upload, UploadClass};
use crate::error::{FailureKind, TaggedFailure};

/// Object as held by the binary store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Binary object store collaborator. `put` returns a dereferenceable URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String, BlobError>;
    async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError>;
    /// Returns `false` when nothing was stored under `key`.
    async fn delete(&self, key: &str) -> Result<bool, BlobError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    Oversize { size: usize, limit: usize },
    #[error("file is empty")]
    Empty,
    #[error("unsupported file type: {content_type}")]
    UnsupportedType { content_type: String },
    #[error("attachment not found")]
    NotFound,
    #[error("attachment storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl AttachmentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AttachmentError::NotFound)
    }
}

impl TaggedFailure for AttachmentError {
    fn kind(&self) -> FailureKind {
        match self {
            AttachmentError::Oversize { .. }
            | AttachmentError::Empty
            | AttachmentError::UnsupportedType { .. } => FailureKind::Validation,
            AttachmentError::NotFound => FailureKind::NotFound,
            AttachmentError::StorageUnavailable(_) => FailureKind::StorageUnavailable,
        }
    }
}

impl From<BlobError> for AttachmentError {
    fn from(value: BlobError) -> Self {
        match value {
            BlobError::Unavailable(reason) => AttachmentError::StorageUnavailable(reason),
        }
    }
}

/// Validating front for the object store.
#[derive(Clone)]
pub struct AttachmentStore {
    blobs: Arc<dyn BlobStore>,
}

impl AttachmentStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Checks size and type without touching the store; returns the resolved content type.
    pub fn validate(upload: &Upload, class: UploadClass) -> Result<String, AttachmentError> {
        let size = upload.bytes.len();
        if size == 0 {
            return Err(AttachmentError::Empty);
        }
        if size > class.max_bytes() {
            return Err(AttachmentError::Oversize {
                size,
                limit: class.max_bytes(),
            });
        }

        match upload.resolved_mime() {
            Some(mime) if class.allows(&mime) => Ok(mime.essence_str().to_string()),
            Some(mime) => Err(AttachmentError::UnsupportedType {
                content_type: mime.essence_str().to_string(),
            }),
            None => Err(AttachmentError::UnsupportedType {
                content_type: upload
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }

    pub async fn put(
        &self,
        owner: &str,
        upload: Upload,
        class: UploadClass,
        uploaded_by: Option<&str>,
    ) -> Result<AttachmentRef, AttachmentError> {
        let content_type = Self::validate(&upload, class)?;
        let id = AttachmentId::generate();
        let key = format!("{owner}/{}", id.0);
        let size = upload.bytes.len();

        let url = self.blobs.put(&key, &content_type, upload.bytes).await?;
        info!(owner, attachment_id = %id.0, size, content_type = %content_type, "attachment stored");

        Ok(AttachmentRef {
            id,
            owner: owner.to_string(),
            file_name: upload.file_name,
            content_type,
            size,
            url,
            uploaded_by: uploaded_by.map(str::to_string),
        })
    }

    pub async fn get(&self, reference: &AttachmentRef) -> Result<AttachmentContent, AttachmentError> {
        let blob = self
            .blobs
            .get(&reference.storage_key())
            .await?
            .ok_or(AttachmentError::NotFound)?;

        Ok(AttachmentContent {
            content_type: blob.content_type,
            bytes: blob.bytes,
        })
    }

    /// Fails with `NotFound` when the object is already gone; compensating callers ignore that.
    pub async fn delete(&self, reference: &AttachmentRef) -> Result<(), AttachmentError> {
        if self.blobs.delete(&reference.storage_key()).await? {
            debug!(owner = %reference.owner, attachment_id = %reference.id.0, "attachment deleted");
            Ok(())
        } else {
            Err(AttachmentError::NotFound)
        }
    }
}
