use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{FleetError, Result};

/// Exclusive advisory lock guarding the inventory and load balancer files
///
/// Held for the duration of one mutating operation and released on drop.
#[derive(Debug)]
pub struct InventoryLock {
    file: File,
    path: PathBuf,
}

impl InventoryLock {
    /// Lock file path for an inventory: `<inventory>.lock`
    pub fn lock_path(inventory: &Path) -> PathBuf {
        let mut raw = inventory.as_os_str().to_owned();
        raw.push(".lock");
        PathBuf::from(raw)
    }

    /// Block until the lock is ours
    pub async fn acquire(inventory: &Path) -> Result<Self> {
        let path = Self::lock_path(inventory);
        let file = open_lock_file(&path)?;

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| FleetError::Io(std::io::Error::other(e)))??;

        debug!(lock = %path.display(), "Acquired inventory lock");
        Ok(Self { file, path })
    }

    /// Take the lock only if nobody else holds it
    pub fn try_acquire(inventory: &Path) -> Result<Self> {
        let path = Self::lock_path(inventory);
        let file = open_lock_file(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| FleetError::InventoryLocked(inventory.to_path_buf()))?;
        Ok(Self { file, path })
    }
}

impl Drop for InventoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "Released inventory lock");
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?)
}
