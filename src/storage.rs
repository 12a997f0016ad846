//! Object storage for recordings and run artifacts.
//!
//! The pipeline reads audio and writes the canonical knowledge artifact
//! through this seam; paths are opaque references, so a filesystem root or
//! an in-memory map satisfy it equally.

use crate::error::{LongwaveError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Trait over the object store holding recordings and artifacts.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch an object's bytes by reference.
    async fn get(&self, reference: &str) -> Result<Vec<u8>>;

    /// Store an object's bytes under a reference, overwriting any
    /// previous version.
    async fn put(&self, reference: &str, bytes: &[u8]) -> Result<()>;
}

/// Filesystem-backed storage rooted at a directory.
///
/// References are paths relative to the root; parent directories are
/// created on write.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn get(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.resolve(reference);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(reference, bytes = bytes.len(), "object read");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LongwaveError::ObjectNotFound {
                    path: reference.to_string(),
                })
            }
            Err(e) => Err(LongwaveError::Storage {
                path: reference.to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn put(&self, reference: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(reference);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LongwaveError::Storage {
                    path: reference.to_string(),
                    message: e.to_string(),
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| LongwaveError::Storage {
                path: reference.to_string(),
                message: e.to_string(),
            })?;
        debug!(reference, bytes = bytes.len(), "object written");
        Ok(())
    }
}

/// In-memory storage for tests.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an object, e.g. the recording under test.
    pub fn insert(&self, reference: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.to_string(), bytes);
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(reference)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn get(&self, reference: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .cloned()
            .ok_or_else(|| LongwaveError::ObjectNotFound {
                path: reference.to_string(),
            })
    }

    async fn put(&self, reference: &str, bytes: &[u8]) -> Result<()> {
        self.insert(reference, bytes.to_vec());
        Ok(())
    }
}

/// Reference under which a run's knowledge artifact is stored.
pub fn knowledge_reference(audio_reference: &str) -> String {
    let stem = Path::new(audio_reference)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(audio_reference);
    format!("runs/{stem}/knowledge.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_roundtrip_creates_parents() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage
            .put("runs/abc/knowledge.json", b"{\"entities\":[]}")
            .await
            .unwrap();
        let bytes = storage.get("runs/abc/knowledge.json").await.unwrap();
        assert_eq!(bytes, b"{\"entities\":[]}");
    }

    #[tokio::test]
    async fn test_local_storage_missing_object() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        let err = storage.get("nope.wav").await.unwrap_err();
        assert!(matches!(err, LongwaveError::ObjectNotFound { .. }));
        assert!(err.to_string().contains("nope.wav"));
    }

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        storage.insert("interview.wav", vec![1, 2, 3]);

        assert_eq!(storage.get("interview.wav").await.unwrap(), vec![1, 2, 3]);
        assert!(storage.get("other.wav").await.is_err());

        storage.put("out.json", b"{}").await.unwrap();
        assert!(storage.contains("out.json"));
    }

    #[test]
    fn test_knowledge_reference_uses_audio_stem() {
        assert_eq!(
            knowledge_reference("inbox/interview.wav"),
            "runs/interview/knowledge.json"
        );
        assert_eq!(knowledge_reference("plain"), "runs/plain/knowledge.json");
    }
}
