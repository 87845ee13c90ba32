//! Media engine: path resolution, private directories, listing,
//! streaming, uploads and directory management over one media root.

pub mod error;
pub mod index;
pub mod kind;
pub mod lock;
pub mod manage;
pub mod resolver;
pub mod stream;
pub mod upload;

pub use error::{MediaError, MediaResult};
pub use index::{DirectoryIndexer, Entry, TreeNode};
pub use lock::{LockPolicy, PrivateDirectory, PrivateLockStore, UnlockOutcome, REGISTRY_FILE};
pub use manage::DirectoryManager;
pub use resolver::{MediaPath, MediaRoot};
pub use stream::{RangeRequest, StreamingEngine};
pub use upload::{ConflictPolicy, UploadEngine};

use anyhow::Context;
use std::sync::Arc;

use crate::auth::SessionId;
use crate::config::Config;

/// Every engine wired to a shared root and lock store.
pub struct MediaLibrary {
    pub root: Arc<MediaRoot>,
    pub locks: Arc<PrivateLockStore>,
    pub indexer: DirectoryIndexer,
    pub streams: StreamingEngine,
    pub uploads: UploadEngine,
    pub dirs: DirectoryManager,
}

impl MediaLibrary {
    /// Open the media root and load the private registry.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let root = MediaRoot::new(&config.video_dir)
            .with_context(|| format!("media root {} unavailable", config.video_dir.display()))?;
        tokio::fs::create_dir_all(&config.state_dir)
            .await
            .with_context(|| format!("cannot create state dir {}", config.state_dir.display()))?;
        let locks = PrivateLockStore::open(root.path(), config.registry_path(), config.lock_policy()).await?;
        Ok(Self::assemble(root, locks, config.upload_conflict))
    }

    pub fn assemble(root: MediaRoot, locks: PrivateLockStore, policy: ConflictPolicy) -> Self {
        let root = Arc::new(root);
        let locks = Arc::new(locks);
        Self {
            indexer: DirectoryIndexer::new(root.clone(), locks.clone()),
            streams: StreamingEngine::new(root.clone(), locks.clone()),
            uploads: UploadEngine::new(root.clone(), locks.clone(), policy),
            dirs: DirectoryManager::new(root.clone(), locks.clone()),
            root,
            locks,
        }
    }

    /// Protect the directory at `path`, replacing any previous password.
    ///
    /// The caller must already be able to enter the directory, so a
    /// password it does not know can never be overwritten.
    pub async fn set_private(
        &self,
        path: &MediaPath,
        password: &str,
        session: &SessionId,
    ) -> MediaResult<PrivateDirectory> {
        let resolved = self.root.resolve_dir(path).await?;
        if resolved.media.is_root() {
            return Err(MediaError::PathViolation);
        }
        self.locks.check_access(&resolved.media, session).await?;
        self.locks.set_private(&resolved.media, password).await
    }

    /// Remove protection from `path`. Returns whether it was protected.
    pub async fn remove_private(&self, path: &MediaPath, session: &SessionId) -> MediaResult<bool> {
        let resolved = self.root.resolve_dir(path).await?;
        self.locks.check_access(&resolved.media, session).await?;
        self.locks.remove_private(&resolved.media).await
    }

    pub async fn unlock(
        &self,
        path: &MediaPath,
        password: &str,
        session: &SessionId,
    ) -> MediaResult<UnlockOutcome> {
        let resolved = self.root.resolve(path).await?;
        self.locks.unlock(&resolved.media, password, session).await
    }

    pub async fn relock(&self, path: &MediaPath, session: &SessionId) -> MediaResult<usize> {
        let resolved = self.root.resolve(path).await?;
        Ok(self.locks.relock(&resolved.media, session).await)
    }
}
