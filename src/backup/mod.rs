//! Timestamp-keyed directory snapshots.
//!
//! Each backup is a full copy of the source tree under
//! `<store>/<unix-millis>/`. The store never deletes anything on its own;
//! retention is the operator's concern.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, info};
use tokio::fs;

use crate::error::{Result, ServerError};

/// Opaque key of one snapshot: the capture instant in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(i64);

impl BackupId {
    fn now() -> Self {
        BackupId(Utc::now().timestamp_millis())
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BackupId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(BackupId)
    }
}

impl From<i64> for BackupId {
    fn from(millis: i64) -> Self {
        BackupId(millis)
    }
}

/// Snapshot store scoped to one source directory.
pub struct BackupStore {
    source: PathBuf,
    store: PathBuf,
}

impl BackupStore {
    pub fn new(source: impl Into<PathBuf>, store: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            store: store.into(),
        }
    }

    pub fn store_dir(&self) -> &Path {
        &self.store
    }

    /// Copies the source tree into a fresh timestamped snapshot directory.
    pub async fn backup(&self) -> Result<BackupId> {
        let mut id = BackupId::now();
        // two captures within the same millisecond must not share a key
        while fs::try_exists(self.store.join(id.to_string())).await? {
            tokio::time::sleep(Duration::from_millis(1)).await;
            id = BackupId::now();
        }

        let dest = self.store.join(id.to_string());
        copy_tree(&self.source, &dest).await?;
        info!("captured backup {} of {}", id, self.source.display());
        Ok(id)
    }

    /// Replaces the source tree with the contents of snapshot `id`.
    ///
    /// The source directory is cleared first so the result matches the
    /// snapshot exactly, including deletions.
    pub async fn restore(&self, id: BackupId) -> Result<()> {
        let snapshot = self.store.join(id.to_string());
        if !fs::try_exists(&snapshot).await? {
            return Err(ServerError::BackupNotFound { id });
        }

        match fs::remove_dir_all(&self.source).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
        copy_tree(&snapshot, &self.source).await?;
        info!("restored backup {} into {}", id, self.source.display());
        Ok(())
    }

    pub async fn exists(&self, id: BackupId) -> bool {
        fs::try_exists(self.store.join(id.to_string()))
            .await
            .unwrap_or(false)
    }

    /// All snapshot keys, oldest first.
    pub async fn list(&self) -> Result<Vec<BackupId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.store).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Ok(id) = entry.file_name().to_string_lossy().parse() {
                ids.push(id);
            } else {
                debug!("ignoring foreign entry in backup store: {:?}", entry.file_name());
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub async fn latest(&self) -> Result<Option<BackupId>> {
        Ok(self.list().await?.pop())
    }
}

/// Recursive copy preserving directory structure and symlinks.
fn copy_tree<'a>(src: &'a Path, dest: &'a Path) -> BoxFuture<'a, io::Result<()>> {
    async move {
        fs::create_dir_all(dest).await?;
        let mut entries = fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = dest.join(entry.file_name());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                copy_tree(&from, &to).await?;
            } else if file_type.is_symlink() {
                let target = fs::read_link(&from).await?;
                match fs::remove_file(&to).await {
                    Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
                    _ => {}
                }
                symlink(&target, &to).await?;
            } else {
                fs::copy(&from, &to).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    fs::symlink_file(target, link).await
}
