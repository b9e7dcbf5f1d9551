use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use super::store::{BlobError, BlobStore, StoredBlob};

/// Process-local object store. URLs point at the board's attachment routes.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, StoredBlob>>>,
}

impl MemoryBlobStore {
    pub fn len(&self) -> usize {
        self.objects.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String, BlobError> {
        let mut guard = self
            .objects
            .lock()
            .map_err(|_| BlobError::Unavailable("blob store lock poisoned".to_string()))?;
        guard.insert(
            key.to_string(),
            StoredBlob {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(format!("memory://attachments/{key}"))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredBlob>, BlobError> {
        let guard = self
            .objects
            .lock()
            .map_err(|_| BlobError::Unavailable("blob store lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        let mut guard = self
            .objects
            .lock()
            .map_err(|_| BlobError::Unavailable("blob store lock poisoned".to_string()))?;
        Ok(guard.remove(key).is_some())
    }
}
