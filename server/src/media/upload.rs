//! Streamed uploads
//!
//! Bytes are written to a hidden staging file next to the destination and
//! only published (renamed or hard-linked) once the stream completed
//! cleanly. Dropping an `UploadSession` at any point before commit removes
//! the staging file, which is how client disconnects are cleaned up.

use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use super::error::{MediaError, MediaResult};
use super::index::Entry;
use super::lock::PrivateLockStore;
use super::resolver::{validate_name, MediaPath, MediaRoot, Resolved};
use crate::auth::SessionId;

const WRITE_BUFFER: usize = 1024 * 1024;
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// What to do when the destination name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Replace the existing file atomically.
    #[default]
    Overwrite,
    /// Fail with `AlreadyExists`.
    Reject,
    /// Publish as `name_1.ext`, `name_2.ext`, ...
    Rename,
}

impl FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "reject" => Ok(ConflictPolicy::Reject),
            "rename" => Ok(ConflictPolicy::Rename),
            other => anyhow::bail!("unknown upload conflict policy: {}", other),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Reject => "reject",
            ConflictPolicy::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// Staging file removed on drop unless disarmed.
struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!("failed to remove staging file {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// An upload in progress.
pub struct UploadSession {
    target: Resolved,
    name: String,
    received: u64,
    session: SessionId,
    committed: bool,
    // Field order matters: the writer closes before the staging file is removed.
    writer: BufWriter<tokio::fs::File>,
    staged: StagedFile,
}

impl UploadSession {
    /// Append the next chunk of the stream.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> MediaResult<()> {
        self.writer.write_all(chunk).await.map_err(MediaError::Io)?;
        self.received += chunk.len() as u64;
        Ok(())
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!(
                dir = %self.target.media,
                name = %self.name,
                received = self.received,
                "upload aborted, discarding partial data"
            );
        }
    }
}

/// Accepts streamed file uploads into the media tree.
pub struct UploadEngine {
    root: Arc<MediaRoot>,
    locks: Arc<PrivateLockStore>,
    policy: ConflictPolicy,
}

impl UploadEngine {
    pub fn new(root: Arc<MediaRoot>, locks: Arc<PrivateLockStore>, policy: ConflictPolicy) -> Self {
        Self { root, locks, policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Validate the destination and open a staging file.
    pub async fn begin(
        &self,
        dir: &MediaPath,
        name: &str,
        session: &SessionId,
    ) -> MediaResult<UploadSession> {
        validate_name(name).inspect_err(|e| {
            if matches!(e, MediaError::PathViolation) {
                tracing::warn!(name = %name, "rejected upload filename");
            }
        })?;
        let target = self.root.resolve_dir(dir).await?;
        self.locks.check_access(&target.media, session).await?;

        let staged_path = target.fs.join(format!(".upload-{}.part", Uuid::new_v4()));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged_path)
            .await
            .map_err(MediaError::Io)?;

        tracing::info!(dir = %target.media, name = %name, "upload started");
        Ok(UploadSession {
            target,
            name: name.to_string(),
            received: 0,
            session: session.clone(),
            committed: false,
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
            staged: StagedFile {
                path: staged_path,
                armed: true,
            },
        })
    }

    /// Flush, re-check the destination and publish under the final name.
    pub async fn commit(&self, mut upload: UploadSession) -> MediaResult<Entry> {
        upload.writer.flush().await.map_err(MediaError::Io)?;
        upload.writer.get_mut().sync_all().await.map_err(MediaError::Io)?;

        // The directory may have been locked or removed while bytes arrived.
        let target = self.root.resolve_dir(&upload.target.media).await?;
        self.locks.check_access(&target.media, &upload.session).await?;

        let final_path = self.publish(&mut upload, &target.fs).await?;
        upload.committed = true;
        let metadata = tokio::fs::metadata(&final_path).await?;
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(upload.name.as_str())
            .to_string();
        let entry = Entry::from_metadata(target.media.join(&file_name)?, &metadata);

        tracing::info!(
            path = %entry.path,
            bytes = upload.received,
            policy = %self.policy,
            "upload committed"
        );
        Ok(entry)
    }

    /// Drain `body` into `name` inside `dir`.
    ///
    /// Any stream error aborts the upload; nothing becomes visible.
    pub async fn upload<S, E>(
        &self,
        dir: &MediaPath,
        name: &str,
        session: &SessionId,
        body: S,
    ) -> MediaResult<Entry>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let mut upload = self.begin(dir, name, session).await?;
        let mut body = std::pin::pin!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| MediaError::Aborted(e.to_string()))?;
            upload.write_chunk(&chunk).await?;
        }
        self.commit(upload).await
    }

    async fn publish(&self, upload: &mut UploadSession, dir: &Path) -> MediaResult<PathBuf> {
        let staged = upload.staged.path.clone();
        match self.policy {
            ConflictPolicy::Overwrite => {
                let final_path = dir.join(&upload.name);
                if tokio::fs::metadata(&final_path).await.is_ok_and(|m| m.is_dir()) {
                    return Err(MediaError::AlreadyExists);
                }
                tokio::fs::rename(&staged, &final_path).await.map_err(MediaError::Io)?;
                upload.staged.disarm();
                Ok(final_path)
            }
            ConflictPolicy::Reject => {
                let final_path = dir.join(&upload.name);
                publish_exclusive(&staged, &final_path).await?;
                Ok(final_path)
            }
            ConflictPolicy::Rename => {
                for attempt in 0..MAX_RENAME_ATTEMPTS {
                    let candidate = dir.join(numbered_name(&upload.name, attempt));
                    match publish_exclusive(&staged, &candidate).await {
                        Ok(()) => return Ok(candidate),
                        Err(MediaError::AlreadyExists) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Err(MediaError::AlreadyExists)
            }
        }
    }
}

/// Publish `staged` at `final_path` only if nothing is there yet.
///
/// Hard links give an atomic create-if-absent; filesystems without them
/// fall back to check-then-rename. The staging name is left for the
/// `StagedFile` guard to remove.
async fn publish_exclusive(staged: &Path, final_path: &Path) -> MediaResult<()> {
    match tokio::fs::hard_link(staged, final_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(MediaError::AlreadyExists),
        Err(e) => {
            tracing::debug!("hard link unavailable ({}), falling back to rename", e);
            if tokio::fs::try_exists(final_path).await.map_err(MediaError::Io)? {
                return Err(MediaError::AlreadyExists);
            }
            tokio::fs::rename(staged, final_path).await.map_err(MediaError::Io)
        }
    }
}

/// `clip.mp4` → `clip_3.mp4` for attempt 3; attempt 0 keeps the name.
fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, attempt, ext),
        None => format!("{}_{}", stem, attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::index::EntryKind;
    use crate::media::lock::LockPolicy;
    use tempfile::{tempdir, TempDir};

    fn p(s: &str) -> MediaPath {
        MediaPath::parse(s).unwrap()
    }

    fn setup(policy: ConflictPolicy) -> (TempDir, UploadEngine, Arc<PrivateLockStore>) {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("inbox")).unwrap();
        let root = Arc::new(MediaRoot::new(temp.path()).unwrap());
        let locks = Arc::new(
            PrivateLockStore::in_memory(root.path(), LockPolicy::default())
                .with_hash_params(argon2::Params::new(8, 1, 1, None).unwrap()),
        );
        (temp, UploadEngine::new(root, locks.clone(), policy), locks)
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        tokio_stream::iter(
            parts
                .iter()
                .map(|p| Ok::<_, std::io::Error>(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
    }

    fn visible_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_upload_commits_file() {
        let (temp, engine, _) = setup(ConflictPolicy::Overwrite);
        let entry = engine
            .upload(
                &p("inbox"),
                "clip.mp4",
                &SessionId::anonymous(),
                chunks(&[b"hello ", b"world"]),
            )
            .await
            .unwrap();

        assert_eq!(entry.path.to_string(), "inbox/clip.mp4");
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size_bytes, Some(11));
        assert_eq!(std::fs::read(temp.path().join("inbox/clip.mp4")).unwrap(), b"hello world");
        assert_eq!(visible_names(&temp.path().join("inbox")), vec!["clip.mp4"]);
    }

    #[tokio::test]
    async fn test_aborted_stream_leaves_nothing_behind() {
        let (temp, engine, _) = setup(ConflictPolicy::Overwrite);
        let body = tokio_stream::iter(vec![
            Ok(Bytes::from_static(b"partial data")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let result = engine
            .upload(&p("inbox"), "clip.mp4", &SessionId::anonymous(), body)
            .await;

        assert!(matches!(result, Err(MediaError::Aborted(_))));
        assert!(visible_names(&temp.path().join("inbox")).is_empty());
    }

    #[tokio::test]
    async fn test_dropped_session_discards_staging_file() {
        let (temp, engine, _) = setup(ConflictPolicy::Overwrite);
        let mut upload = engine
            .begin(&p("inbox"), "clip.mp4", &SessionId::anonymous())
            .await
            .unwrap();
        upload.write_chunk(b"some bytes").await.unwrap();
        assert_eq!(upload.received, 10);
        assert_eq!(visible_names(&temp.path().join("inbox")).len(), 1);

        drop(upload);
        assert!(visible_names(&temp.path().join("inbox")).is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_policy_replaces() {
        let (temp, engine, _) = setup(ConflictPolicy::Overwrite);
        std::fs::write(temp.path().join("inbox/clip.mp4"), b"old").unwrap();
        engine
            .upload(&p("inbox"), "clip.mp4", &SessionId::anonymous(), chunks(&[b"new"]))
            .await
            .unwrap();
        assert_eq!(std::fs::read(temp.path().join("inbox/clip.mp4")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_reject_policy_keeps_existing() {
        let (temp, engine, _) = setup(ConflictPolicy::Reject);
        std::fs::write(temp.path().join("inbox/clip.mp4"), b"old").unwrap();
        let result = engine
            .upload(&p("inbox"), "clip.mp4", &SessionId::anonymous(), chunks(&[b"new"]))
            .await;
        assert!(matches!(result, Err(MediaError::AlreadyExists)));
        assert_eq!(std::fs::read(temp.path().join("inbox/clip.mp4")).unwrap(), b"old");
        assert_eq!(visible_names(&temp.path().join("inbox")), vec!["clip.mp4"]);
    }

    #[tokio::test]
    async fn test_rename_policy_numbers_duplicates() {
        let (temp, engine, _) = setup(ConflictPolicy::Rename);
        std::fs::write(temp.path().join("inbox/clip.mp4"), b"old").unwrap();
        let entry = engine
            .upload(&p("inbox"), "clip.mp4", &SessionId::anonymous(), chunks(&[b"new"]))
            .await
            .unwrap();
        assert_eq!(entry.name, "clip_1.mp4");
        assert_eq!(
            visible_names(&temp.path().join("inbox")),
            vec!["clip.mp4", "clip_1.mp4"]
        );
    }

    #[tokio::test]
    async fn test_existing_directory_name_is_rejected() {
        let (temp, engine, _) = setup(ConflictPolicy::Overwrite);
        std::fs::create_dir(temp.path().join("inbox/clip.mp4")).unwrap();
        let result = engine
            .upload(&p("inbox"), "clip.mp4", &SessionId::anonymous(), chunks(&[b"x"]))
            .await;
        assert!(matches!(result, Err(MediaError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_traversal_filenames_are_rejected() {
        let (_temp, engine, _) = setup(ConflictPolicy::Overwrite);
        for bad in ["../escape.mp4", "a/b.mp4", ".."] {
            let result = engine
                .upload(&p("inbox"), bad, &SessionId::anonymous(), chunks(&[b"x"]))
                .await;
            assert!(matches!(result, Err(MediaError::PathViolation)), "accepted {bad}");
        }
        let result = engine
            .upload(&p("inbox"), ".hidden", &SessionId::anonymous(), chunks(&[b"x"]))
            .await;
        assert!(matches!(result, Err(MediaError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_locked_directory_rejects_upload() {
        let (temp, engine, locks) = setup(ConflictPolicy::Overwrite);
        let session = SessionId::generate();
        locks.set_private(&p("inbox"), "pw").await.unwrap();

        let result = engine
            .upload(&p("inbox"), "clip.mp4", &session, chunks(&[b"x"]))
            .await;
        assert!(matches!(result, Err(MediaError::Locked)));
        assert!(visible_names(&temp.path().join("inbox")).is_empty());

        locks.unlock(&p("inbox"), "pw", &session).await.unwrap();
        engine
            .upload(&p("inbox"), "clip.mp4", &session, chunks(&[b"x"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_directory_locked_mid_upload_discards() {
        let (temp, engine, locks) = setup(ConflictPolicy::Overwrite);
        let session = SessionId::generate();
        let mut upload = engine.begin(&p("inbox"), "clip.mp4", &session).await.unwrap();
        upload.write_chunk(b"data").await.unwrap();

        locks.set_private(&p("inbox"), "pw").await.unwrap();
        assert!(matches!(engine.commit(upload).await, Err(MediaError::Locked)));
        assert!(visible_names(&temp.path().join("inbox")).is_empty());
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("clip.mp4", 0), "clip.mp4");
        assert_eq!(numbered_name("clip.mp4", 2), "clip_2.mp4");
        assert_eq!(numbered_name("README", 1), "README_1");
        assert_eq!(numbered_name("a.tar.gz", 1), "a.tar_1.gz");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("Overwrite".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Overwrite);
        assert_eq!("reject".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Reject);
        assert_eq!("rename".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Rename);
        assert!("merge".parse::<ConflictPolicy>().is_err());
    }
}
