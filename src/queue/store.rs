//! Durable storage for the offline queue.
//!
//! One record array per diagram, stored as plain JSON so the queue survives
//! a process restart. `MemQueueStore` backs tests, `FileQueueStore` backs
//! real sessions.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use crate::{Result, ShareLock, ToposyncError, queue::PendingOperation};

/// Persistence backend for pending-operation logs.
pub trait QueueStore: Send + Sync {
    /// Restore the ordered log for a diagram; empty when none was saved.
    fn load(
        &self,
        diagram_id: &str,
    ) -> Result<Vec<PendingOperation>>;

    /// Overwrite the ordered log for a diagram.
    fn save(
        &self,
        diagram_id: &str,
        ops: &[PendingOperation],
    ) -> Result<()>;
}

/// In-memory store, for tests and throwaway sessions.
#[derive(Clone, Default)]
pub struct MemQueueStore {
    entries: ShareLock<HashMap<String, Vec<PendingOperation>>>,
}

impl MemQueueStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl QueueStore for MemQueueStore {
    fn load(
        &self,
        diagram_id: &str,
    ) -> Result<Vec<PendingOperation>> {
        Ok(self.entries.read().unwrap().get(diagram_id).cloned().unwrap_or_default())
    }

    fn save(
        &self,
        diagram_id: &str,
        ops: &[PendingOperation],
    ) -> Result<()> {
        self.entries.write().unwrap().insert(diagram_id.to_string(), ops.to_vec());
        Ok(())
    }
}

/// File-backed store: one `{diagram_id}.json` per diagram under `dir`.
pub struct FileQueueStore {
    dir: PathBuf,
}

impl FileQueueStore {
    pub fn new<T: AsRef<Path>>(dir: T) -> Result<Self> {
        fs::create_dir_all(dir.as_ref()).map_err(|e| ToposyncError::Store(format!("failed to create queue dir {:?}: {}", dir.as_ref(), e)))?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path(
        &self,
        diagram_id: &str,
    ) -> PathBuf {
        self.dir.join(format!("{}.json", diagram_id))
    }
}

impl QueueStore for FileQueueStore {
    fn load(
        &self,
        diagram_id: &str,
    ) -> Result<Vec<PendingOperation>> {
        let path = self.path(diagram_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let data = fs::read(&path).map_err(|e| ToposyncError::Store(format!("failed to read {:?}: {}", path, e)))?;
        serde_json::from_slice(&data).map_err(|e| ToposyncError::Store(format!("corrupt queue file {:?}: {}", path, e)))
    }

    fn save(
        &self,
        diagram_id: &str,
        ops: &[PendingOperation],
    ) -> Result<()> {
        let path = self.path(diagram_id);
        let data = serde_json::to_vec_pretty(ops)?;
        fs::write(&path, data).map_err(|e| ToposyncError::Store(format!("failed to write {:?}: {}", path, e)))
    }
}
