//! Directory listing
//!
//! Listings are derived from the filesystem on every request and merged
//! with the lock store's state. Dot-names are never listed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::Metadata;
use std::sync::Arc;
use walkdir::WalkDir;

use super::error::{MediaError, MediaResult};
use super::kind::MediaKind;
use super::lock::{AccessView, PrivateLockStore};
use super::resolver::{MediaPath, MediaRoot, Resolved};
use crate::auth::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed directory.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub name: String,
    pub path: MediaPath,
    pub kind: EntryKind,
    /// Files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub is_private: bool,
    pub is_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaKind>,
}

impl Entry {
    pub fn from_metadata(path: MediaPath, metadata: &Metadata) -> Self {
        let is_dir = metadata.is_dir();
        Self {
            name: path.name().unwrap_or_default().to_string(),
            kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
            size_bytes: (!is_dir).then(|| metadata.len()),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            is_private: false,
            is_locked: false,
            media_type: if is_dir { None } else { MediaKind::from_path(path.to_string()) },
            path,
        }
    }
}

/// One directory in a tree listing.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub path: MediaPath,
    pub depth: usize,
    pub is_private: bool,
    pub is_locked: bool,
}

/// Lists directory contents for a session.
pub struct DirectoryIndexer {
    root: Arc<MediaRoot>,
    locks: Arc<PrivateLockStore>,
}

impl DirectoryIndexer {
    pub fn new(root: Arc<MediaRoot>, locks: Arc<PrivateLockStore>) -> Self {
        Self { root, locks }
    }

    /// Children of `path`, sorted by name.
    ///
    /// Private children appear as placeholders whose `is_locked` reflects
    /// the session's grants; their contents are never read here.
    pub async fn list(&self, path: &MediaPath, session: &SessionId) -> MediaResult<Vec<Entry>> {
        let resolved = self.root.resolve_dir(path).await?;
        self.locks.check_access(&resolved.media, session).await?;
        let view = self.locks.view(session).await;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&resolved.fs).await?;
        while let Some(child) = dir.next_entry().await? {
            let Some(name) = child.file_name().to_str().map(str::to_string) else {
                tracing::debug!("skipping non UTF-8 name in {}", resolved.media);
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Ok(child_path) = resolved.media.join(&name) else {
                continue;
            };
            let Ok(file_type) = child.file_type().await else {
                continue;
            };
            // Links are listed only when their target stays under the root,
            // and lock state follows the target. Dangling links are skipped.
            let target = if file_type.is_symlink() {
                match self.root.resolve(&child_path).await {
                    Ok(target) => target,
                    Err(e) => {
                        tracing::debug!(path = %child_path, "skipping link: {}", e);
                        continue;
                    }
                }
            } else {
                Resolved { media: child_path.clone(), fs: child.path() }
            };
            let Ok(metadata) = tokio::fs::metadata(&target.fs).await else {
                continue;
            };
            if !metadata.is_dir() && !view.can_access(&target.media) {
                continue;
            }

            let mut entry = Entry::from_metadata(child_path, &metadata);
            if metadata.is_dir() && view.is_private(&target.media) {
                entry.is_private = true;
                entry.is_locked = !view.can_access(&target.media);
            } else if metadata.is_dir() && !view.can_access(&target.media) {
                // A link into a locked tree shows up as locked.
                entry.is_locked = true;
            }
            entries.push(entry);
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!(path = %resolved.media, count = entries.len(), "listed directory");
        Ok(entries)
    }

    /// Every directory under `path` the session may see, depth first.
    ///
    /// Locked directories are reported but not descended into.
    pub async fn tree(&self, path: &MediaPath, session: &SessionId) -> MediaResult<Vec<TreeNode>> {
        let resolved = self.root.resolve_dir(path).await?;
        self.locks.check_access(&resolved.media, session).await?;
        let view = self.locks.view(session).await;

        tokio::task::spawn_blocking(move || walk_tree(resolved.fs, resolved.media, &view))
            .await
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))
    }
}

fn walk_tree(base_fs: std::path::PathBuf, base: MediaPath, view: &AccessView) -> Vec<TreeNode> {
    let mut nodes = Vec::new();
    // The root itself may have a dot-name (it is never listed anyway).
    let mut iter = WalkDir::new(&base_fs)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || (e.file_type().is_dir()
                    && !e.file_name().to_str().map_or(true, |n| n.starts_with('.')))
        });

    let mut stack: Vec<MediaPath> = vec![base];
    while let Some(next) = iter.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("tree walk error: {}", e);
                continue;
            }
        };
        let depth = entry.depth();
        stack.truncate(depth);
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Ok(path) = stack[depth - 1].join(name) else {
            iter.skip_current_dir();
            continue;
        };

        let is_private = view.is_private(&path);
        let is_locked = !view.can_access(&path);
        if is_locked {
            iter.skip_current_dir();
        }
        nodes.push(TreeNode {
            name: name.to_string(),
            path: path.clone(),
            depth,
            is_private,
            is_locked,
        });
        stack.push(path);
    }
    nodes
}
