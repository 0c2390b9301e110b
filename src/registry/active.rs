//! The active model pointer

use crate::error::{ChurnError, Result};
use crate::evaluation::Metric;
use crate::tracking::{ArtifactRef, RunId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// The promoted run and where its artifact lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveModel {
    pub run_id: RunId,
    /// Ranking metric at promotion time
    pub metric: Metric,
    /// Raw value of `metric` for the promoted run
    pub score: f64,
    pub artifact: ArtifactRef,
    /// Incremented on every promotion
    pub version: u64,
    pub promoted_at: DateTime<Utc>,
}

/// Singleton reference to the active model
///
/// Owned by whoever wires the pipeline together and handed to the promoter
/// and the inference service. Readers clone an `Arc` under a short read
/// lock; the promoter replaces it under a write lock held only for the swap.
#[derive(Debug, Default)]
pub struct ModelPointer {
    current: RwLock<Option<Arc<ActiveModel>>>,
    promotion: Mutex<()>,
    path: Option<PathBuf>,
}

impl ModelPointer {
    /// Pointer living only in this process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Pointer persisted as JSON at `path`, loading it if present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = read_pointer(&path)?.map(Arc::new);
        if let Some(active) = &current {
            info!(run_id = %active.run_id, version = active.version, "Loaded active model pointer");
        }
        Ok(Self {
            current: RwLock::new(current),
            promotion: Mutex::new(()),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn current(&self) -> Option<Arc<ActiveModel>> {
        self.current.read().clone()
    }

    /// Version of the active model, 0 when nothing is active
    pub fn version(&self) -> u64 {
        self.current.read().as_ref().map_or(0, |a| a.version)
    }

    /// Pick up a promotion made by another process through the pointer file
    pub fn refresh(&self) -> Result<Option<Arc<ActiveModel>>> {
        let Some(path) = &self.path else {
            return Ok(self.current());
        };
        let Some(on_disk) = read_pointer(path)? else {
            return Ok(self.current());
        };
        if on_disk.version > self.version() {
            debug!(run_id = %on_disk.run_id, version = on_disk.version, "Active model changed on disk");
            *self.current.write() = Some(Arc::new(on_disk));
        }
        Ok(self.current())
    }

    /// Serializes promotions against each other
    pub(crate) fn lock_promotion(&self) -> MutexGuard<'_, ()> {
        self.promotion.lock()
    }

    /// Persist, then publish the new active model
    pub(crate) fn swap(&self, next: ActiveModel) -> Result<Arc<ActiveModel>> {
        if let Some(path) = &self.path {
            write_pointer(path, &next)?;
        }
        let next = Arc::new(next);
        *self.current.write() = Some(Arc::clone(&next));
        Ok(next)
    }
}

fn read_pointer(path: &Path) -> Result<Option<ActiveModel>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let active = serde_json::from_slice(&bytes).map_err(|e| {
        ChurnError::SerializationError(format!("invalid active model pointer {}: {}", path.display(), e))
    })?;
    Ok(Some(active))
}

fn write_pointer(path: &Path, active: &ActiveModel) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(active)?)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(version: u64) -> ActiveModel {
        ActiveModel {
            run_id: RunId::new(version),
            metric: Metric::F1,
            score: 0.8,
            artifact: ArtifactRef {
                run_id: RunId::new(version),
                location: "memory://x".to_string(),
                sha256: String::new(),
                size_bytes: 0,
            },
            version,
            promoted_at: Utc::now(),
        }
    }

    #[test]
    fn test_pointer_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.json");

        let pointer = ModelPointer::open(&path).unwrap();
        assert!(pointer.current().is_none());
        assert_eq!(pointer.version(), 0);
        pointer.swap(active(1)).unwrap();

        let reopened = ModelPointer::open(&path).unwrap();
        assert_eq!(reopened.current().unwrap().run_id, RunId::new(1));
    }

    #[test]
    fn test_refresh_sees_newer_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.json");
        let reader = ModelPointer::open(&path).unwrap();
        let writer = ModelPointer::open(&path).unwrap();

        writer.swap(active(3)).unwrap();
        assert_eq!(reader.version(), 0);
        assert_eq!(reader.refresh().unwrap().unwrap().version, 3);
    }
}
