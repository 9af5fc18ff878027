//! Evidence file storage.
//! S3-compatible object storage for production, an in-memory bucket for tests
//! and the `memory` backend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[cfg(feature = "drive")]
pub mod s3;

#[cfg(feature = "drive")]
pub use s3::S3BlobStore;

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Failed to upload {path}: {reason}")]
    Upload { path: String, reason: String },
    #[error("Failed to delete {path}: {reason}")]
    Delete { path: String, reason: String },
    #[error("Failed to sign download URL for {path}: {reason}")]
    Presign { path: String, reason: String },
    #[error("Drive configuration error: {0}")]
    Config(String),
}

/// Blob storage contract used by the evidence manager.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), DriveError>;
    async fn delete(&self, path: &str) -> Result<(), DriveError>;
    async fn exists(&self, path: &str) -> Result<bool, DriveError>;
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, DriveError>;
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Process-local bucket. Failure switches let tests exercise the
/// compensating paths of the evidence manager.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    fail_puts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), DriveError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(DriveError::Upload {
                path: path.to_string(),
                reason: "bucket unavailable".to_string(),
            });
        }
        self.objects.write().await.insert(
            path.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), DriveError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(DriveError::Delete {
                path: path.to_string(),
                reason: "bucket unavailable".to_string(),
            });
        }
        self.objects.write().await.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, DriveError> {
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, DriveError> {
        let expires = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        Ok(format!("memory://evidence/{path}?expires={expires}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_put_and_delete() {
        let store = InMemoryBlobStore::new();
        store.put("a/b.pdf", b"%PDF-1.4".to_vec(), "application/pdf").await.unwrap();
        assert!(store.exists("a/b.pdf").await.unwrap());
        store.delete("a/b.pdf").await.unwrap();
        assert!(!store.exists("a/b.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let store = InMemoryBlobStore::new();
        store.fail_puts(true);
        assert!(store.put("x", vec![1], "image/png").await.is_err());
        assert_eq!(store.object_count().await, 0);

        store.fail_puts(false);
        store.put("x", vec![1], "image/png").await.unwrap();
        store.fail_deletes(true);
        assert!(matches!(store.delete("x").await, Err(DriveError::Delete { .. })));
        assert!(store.exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_signed_url_carries_expiry() {
        let store = InMemoryBlobStore::new();
        let url = store.signed_url("p/q.png", Duration::from_secs(3600)).await.unwrap();
        assert!(url.starts_with("memory://evidence/p/q.png?expires="));
    }
}
