//! Run-addressed, write-once artifact storage

use super::run::RunId;
use crate::error::{ChurnError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where an artifact lives and the checksum it was written with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub run_id: RunId,
    pub location: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Compute SHA-256 hash of data
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn verify(reference: &ArtifactRef, bytes: &[u8]) -> Result<()> {
    let actual = compute_sha256(bytes);
    if actual != reference.sha256 {
        return Err(ChurnError::ArtifactError(format!(
            "checksum mismatch for {}: expected {}, got {}",
            reference.run_id, reference.sha256, actual
        )));
    }
    Ok(())
}

/// Storage for serialized model artifacts, one per run
pub trait ArtifactStore: Send + Sync {
    /// Store bytes for a run; a second write for the same run fails
    fn put(&self, run_id: RunId, bytes: &[u8]) -> Result<ArtifactRef>;

    /// Read bytes back, verifying the checksum
    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>>;
}

/// Artifacts as files under a directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, run_id: RunId) -> PathBuf {
        self.root.join(format!("{}.json", run_id))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, run_id: RunId, bytes: &[u8]) -> Result<ArtifactRef> {
        let path = self.path_for(run_id);
        if path.exists() {
            return Err(ChurnError::ArtifactError(format!("artifact for {} already exists", run_id)));
        }

        // write to a temp file first so readers never see a partial artifact
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        debug!(run_id = %run_id, path = %path.display(), bytes = bytes.len(), "Stored artifact");
        Ok(ArtifactRef {
            run_id,
            location: path.display().to_string(),
            sha256: compute_sha256(bytes),
            size_bytes: bytes.len() as u64,
        })
    }

    /// Resolved by run id under this store's root; `location` is informational
    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>> {
        let path = self.path_for(reference.run_id);
        let bytes = fs::read(&path)
            .map_err(|e| ChurnError::ArtifactError(format!("cannot read {}: {}", path.display(), e)))?;
        verify(reference, &bytes)?;
        Ok(bytes)
    }
}

/// In-process artifact store
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<RunId, Arc<Vec<u8>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, run_id: RunId, bytes: &[u8]) -> Result<ArtifactRef> {
        let mut blobs = self.blobs.write();
        if blobs.contains_key(&run_id) {
            return Err(ChurnError::ArtifactError(format!("artifact for {} already exists", run_id)));
        }
        blobs.insert(run_id, Arc::new(bytes.to_vec()));
        Ok(ArtifactRef {
            run_id,
            location: format!("memory://{}", run_id),
            sha256: compute_sha256(bytes),
            size_bytes: bytes.len() as u64,
        })
    }

    fn get(&self, reference: &ArtifactRef) -> Result<Vec<u8>> {
        let bytes = self
            .blobs
            .read()
            .get(&reference.run_id)
            .cloned()
            .ok_or_else(|| ChurnError::ArtifactError(format!("no artifact for {}", reference.run_id)))?;
        verify(reference, &bytes)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_store_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts")).unwrap();

        let reference = store.put(RunId::new(1), b"model").unwrap();
        assert_eq!(reference.size_bytes, 5);
        assert_eq!(store.get(&reference).unwrap(), b"model");
        assert!(store.put(RunId::new(1), b"other").is_err());
        assert_eq!(store.get(&reference).unwrap(), b"model");
    }

    #[test]
    fn test_fs_store_resolves_by_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let written = dir.path().join("old-home").join("artifacts");
        let reference = FsArtifactStore::new(&written).unwrap().put(RunId::new(4), b"model").unwrap();

        // the same home reached through another path
        let moved = dir.path().join("new-home");
        fs::create_dir_all(&moved).unwrap();
        fs::rename(&written, moved.join("artifacts")).unwrap();
        let store = FsArtifactStore::new(moved.join("artifacts")).unwrap();

        assert!(!Path::new(&reference.location).exists());
        assert_eq!(store.get(&reference).unwrap(), b"model");
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let reference = store.put(RunId::new(2), b"model").unwrap();
        fs::write(&reference.location, b"tampered").unwrap();

        let err = store.get(&reference).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryArtifactStore::new();
        let reference = store.put(RunId::new(3), b"abc").unwrap();
        assert_eq!(
            reference.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(store.get(&reference).unwrap(), b"abc");
        assert!(store.put(RunId::new(3), b"abc").is_err());
        assert_eq!(store.len(), 1);
    }
}
