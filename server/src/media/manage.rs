//! Directory creation and removal

use std::sync::Arc;

use super::error::{MediaError, MediaResult};
use super::index::Entry;
use super::lock::PrivateLockStore;
use super::resolver::{validate_name, MediaPath, MediaRoot};
use crate::auth::SessionId;

/// Creates and removes directories inside the media tree.
pub struct DirectoryManager {
    root: Arc<MediaRoot>,
    locks: Arc<PrivateLockStore>,
}

impl DirectoryManager {
    pub fn new(root: Arc<MediaRoot>, locks: Arc<PrivateLockStore>) -> Self {
        Self { root, locks }
    }

    /// Create `name` inside `parent`, optionally protecting it at once.
    ///
    /// If protecting the new directory fails it is removed again, so a
    /// directory meant to be private is never left open.
    pub async fn create(
        &self,
        parent: &MediaPath,
        name: &str,
        session: &SessionId,
        password: Option<&str>,
    ) -> MediaResult<Entry> {
        validate_name(name)?;
        let parent = self.root.resolve_dir(parent).await?;
        self.locks.check_access(&parent.media, session).await?;

        let path = parent.media.join(name)?;
        let fs_path = parent.fs.join(name);
        tokio::fs::create_dir(&fs_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => MediaError::AlreadyExists,
            _ => MediaError::Io(e),
        })?;

        let mut entry = Entry::from_metadata(path.clone(), &tokio::fs::metadata(&fs_path).await?);
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            if let Err(e) = self.locks.set_private(&path, password).await {
                if let Err(cleanup) = tokio::fs::remove_dir(&fs_path).await {
                    tracing::error!(path = %path, "failed to roll back new directory: {}", cleanup);
                }
                return Err(e);
            }
            // The creator starts locked out like everyone else.
            entry.is_private = true;
            entry.is_locked = true;
        }

        tracing::info!(path = %path, private = entry.is_private, "directory created");
        Ok(entry)
    }

    /// Remove the directory at `path`.
    ///
    /// Without `recursive` the directory must be empty. With it, every
    /// private directory inside must already be unlocked by `session`.
    pub async fn remove(&self, path: &MediaPath, recursive: bool, session: &SessionId) -> MediaResult<()> {
        if path.is_root() {
            return Err(MediaError::PathViolation);
        }
        let resolved = self.root.resolve_dir(path).await?;
        if resolved.media.is_root() {
            tracing::warn!(path = %path, "refusing to remove the media root through a link");
            return Err(MediaError::PathViolation);
        }
        self.locks.check_access(&resolved.media, session).await?;

        for nested in self.locks.records_under(&resolved.media).await {
            self.locks.check_access(&nested, session).await?;
        }

        if recursive {
            tokio::fs::remove_dir_all(&resolved.fs).await?;
        } else {
            let mut children = tokio::fs::read_dir(&resolved.fs).await?;
            if children.next_entry().await?.is_some() {
                return Err(MediaError::NotEmpty);
            }
            tokio::fs::remove_dir(&resolved.fs).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::DirectoryNotEmpty => MediaError::NotEmpty,
                _ => MediaError::from(e),
            })?;
        }

        let forgotten = self.locks.forget_subtree(&resolved.media).await?;
        tracing::info!(path = %resolved.media, recursive, forgotten, "directory removed");
        Ok(())
    }
}
