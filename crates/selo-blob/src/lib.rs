//! Blob storage for selo.
//!
//! Documents and signature artefacts live under a single blob root,
//! partitioned by tenant. Keys are relative slash-separated paths
//! (`{tenant_id}/{doc_id}.pdf`, `{tenant_id}/signatures/{signer_id}.png`).
//! Writes land in a scratch directory first and reach their final key by
//! rename, so a key either holds a complete blob or nothing.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

/// Error type for blob operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Trait for blob persistence. The filesystem implementation is the only one
/// shipped; the trait keeps the door open for object storage.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Write bytes under a key via temp file + atomic rename.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError>;

    /// Read the full blob at a key.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Remove the blob at a key. Missing blobs are not an error.
    async fn remove(&self, key: &str) -> Result<(), BlobError>;
}

/// Filesystem-backed blob store rooted at a directory.
pub struct FsBlobStore {
    root: PathBuf,
}

const SCRATCH_DIR: &str = "tmp";

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key, rejecting absolute paths and parent traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf, BlobError> {
        let rel = Path::new(key);
        if key.is_empty()
            || rel.components().any(|c| {
                !matches!(c, Component::Normal(_))
            })
        {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> BlobError + '_ {
        move |source| BlobError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Self::io_err(key))?;
        }

        let scratch_dir = self.root.join(SCRATCH_DIR);
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(Self::io_err(key))?;
        let scratch = scratch_dir.join(format!("{}.part", Uuid::now_v7()));

        tokio::fs::write(&scratch, bytes)
            .await
            .map_err(Self::io_err(key))?;

        // Rename only works atomically within one filesystem; the scratch
        // dir lives under the root for that reason.
        if let Err(source) = tokio::fs::rename(&scratch, &target).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(BlobError::Io {
                key: key.to_string(),
                source,
            });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(source) => Err(BlobError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), BlobError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BlobError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Insert `-signed` before the key's extension (or append it when the key
/// has none): `t1/doc.pdf` → `t1/doc-signed.pdf`.
pub fn signed_variant_key(key: &str) -> String {
    match key.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !stem.ends_with('/') => {
            format!("{}-signed.{}", stem, ext)
        }
        _ => format!("{}-signed", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        store.put("t1/doc.pdf", b"hello").await.unwrap();
        assert_eq!(store.get("t1/doc.pdf").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_put_creates_nested_dirs() {
        let (_dir, store) = store();
        store
            .put("t1/signatures/s1.png", b"\x89PNG")
            .await
            .unwrap();
        assert_eq!(store.get("t1/signatures/s1.png").await.unwrap(), b"\x89PNG");
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, store) = store();
        store.put("k", b"one").await.unwrap();
        store.put("k", b"two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get("absent").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_dir, store) = store();
        store.put("k", b"x").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(matches!(store.get("k").await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get("../etc/passwd").await,
            Err(BlobError::InvalidKey(_))
        ));
        assert!(matches!(
            store.put("/abs/path", b"x").await,
            Err(BlobError::InvalidKey(_))
        ));
        assert!(matches!(store.get("").await, Err(BlobError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_no_scratch_left_behind() {
        let (dir, store) = store();
        store.put("t1/doc.pdf", b"data").await.unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join(SCRATCH_DIR))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_signed_variant_key() {
        assert_eq!(signed_variant_key("t1/doc.pdf"), "t1/doc-signed.pdf");
        assert_eq!(signed_variant_key("t1/doc"), "t1/doc-signed");
        assert_eq!(signed_variant_key("t1.dir/doc.pdf"), "t1.dir/doc-signed.pdf");
    }
}
