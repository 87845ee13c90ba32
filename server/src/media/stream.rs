//! Range-aware file streaming
//!
//! Files are read lazily in fixed-size chunks; nothing is buffered beyond
//! one chunk per response. Each request opens its own handle, so
//! concurrent readers of the same file never share a cursor.

use bytes::Bytes;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::Stream;

use super::error::{MediaError, MediaResult};
use super::kind;
use super::lock::PrivateLockStore;
use super::resolver::{MediaPath, MediaRoot};
use crate::auth::SessionId;

/// Read size per yielded chunk.
const CHUNK_SIZE: usize = 256 * 1024;

/// A single byte range as requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end` (inclusive)
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-len`
    Suffix { len: u64 },
}

/// Outcome of parsing a `Range` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range: serve the whole file.
    Full,
    Single(ByteRange),
    /// Syntactically a byte range, but not one we can serve.
    Unsatisfiable,
}

impl RangeRequest {
    /// Interpret a `Range` header. Units other than `bytes` are ignored.
    pub fn parse(header: Option<&str>) -> Self {
        let Some(value) = header else {
            return RangeRequest::Full;
        };
        let Some(spec) = value.trim().strip_prefix("bytes=") else {
            return RangeRequest::Full;
        };
        if spec.contains(',') {
            return RangeRequest::Unsatisfiable;
        }
        let Some((start, end)) = spec.trim().split_once('-') else {
            return RangeRequest::Unsatisfiable;
        };
        let (start, end) = (start.trim(), end.trim());

        let range = match (start.is_empty(), end.is_empty()) {
            (true, true) => return RangeRequest::Unsatisfiable,
            (true, false) => end.parse().map(|len| ByteRange::Suffix { len }),
            (false, true) => start.parse().map(|start| ByteRange::From { start }),
            (false, false) => start
                .parse()
                .and_then(|start| end.parse().map(|end| ByteRange::Bounded { start, end })),
        };
        match range {
            Ok(range) => RangeRequest::Single(range),
            Err(_) => RangeRequest::Unsatisfiable,
        }
    }
}

impl ByteRange {
    /// Inclusive `(start, end)` within a file of `size` bytes.
    ///
    /// An end past the file is clamped to the last byte.
    pub fn resolve(self, size: u64) -> MediaResult<(u64, u64)> {
        let unsatisfiable = MediaError::RangeNotSatisfiable { size };
        if size == 0 {
            return Err(unsatisfiable);
        }
        let last = size - 1;
        let (start, end) = match self {
            ByteRange::Bounded { start, end } => (start, end.min(last)),
            ByteRange::From { start } => (start, last),
            ByteRange::Suffix { len } => {
                if len == 0 {
                    return Err(unsatisfiable);
                }
                (size.saturating_sub(len), last)
            }
        };
        if start >= size || start > end {
            return Err(unsatisfiable);
        }
        Ok((start, end))
    }
}

/// The span actually served for a partial response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ServedRange {
    /// `Content-Range` header value.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// An opened file positioned at the first byte to serve.
#[derive(Debug)]
pub struct MediaStream {
    file: tokio::fs::File,
    /// `None` for a full (200) response.
    pub range: Option<ServedRange>,
    pub content_length: u64,
    pub content_type: String,
    pub file_name: String,
}

impl MediaStream {
    /// Lazily read the selected bytes.
    ///
    /// A file that shrinks mid-stream ends the body with an error rather
    /// than a short, silently truncated response.
    pub fn into_body(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let mut file = self.file;
        let mut remaining = self.content_length;
        async_stream::stream! {
            let mut buf = vec![0u8; CHUNK_SIZE.min(remaining.max(1) as usize)];
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                match file.read(&mut buf[..want]).await {
                    Ok(0) => {
                        yield Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "file shrank while streaming",
                        ));
                        return;
                    }
                    Ok(n) => {
                        remaining -= n as u64;
                        yield Ok(Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    }
}

/// Serves file contents with HTTP range semantics.
pub struct StreamingEngine {
    root: Arc<MediaRoot>,
    locks: Arc<PrivateLockStore>,
}

impl StreamingEngine {
    pub fn new(root: Arc<MediaRoot>, locks: Arc<PrivateLockStore>) -> Self {
        Self { root, locks }
    }

    /// Open `path` for `session`, honoring `range`.
    pub async fn open(
        &self,
        path: &MediaPath,
        range: RangeRequest,
        session: &SessionId,
    ) -> MediaResult<MediaStream> {
        let resolved = self.root.resolve(path).await?;
        self.locks.check_access(&resolved.media, session).await?;

        let mut file = tokio::fs::File::open(&resolved.fs).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(MediaError::NotFound);
        }
        let total_size = metadata.len();

        let served = match range {
            RangeRequest::Full => None,
            RangeRequest::Unsatisfiable => {
                return Err(MediaError::RangeNotSatisfiable { size: total_size })
            }
            RangeRequest::Single(range) => {
                let (start, end) = range.resolve(total_size)?;
                Some(ServedRange {
                    start,
                    end,
                    total: total_size,
                })
            }
        };

        let content_length = match served {
            Some(r) => {
                file.seek(SeekFrom::Start(r.start)).await?;
                r.end - r.start + 1
            }
            None => total_size,
        };

        let fs_path: PathBuf = resolved.fs;
        tracing::debug!(
            path = %resolved.media,
            start = served.map(|r| r.start),
            length = content_length,
            total = total_size,
            "streaming file"
        );

        Ok(MediaStream {
            file,
            range: served,
            content_length,
            content_type: kind::content_type(&fs_path),
            file_name: resolved.media.name().unwrap_or("download").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::lock::LockPolicy;
    use tempfile::{tempdir, TempDir};
    use tokio_stream::StreamExt;

    fn p(s: &str) -> MediaPath {
        MediaPath::parse(s).unwrap()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn setup(content: &[u8]) -> (TempDir, StreamingEngine, Arc<PrivateLockStore>) {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("videos")).unwrap();
        std::fs::write(temp.path().join("videos/clip.mp4"), content).unwrap();
        let root = Arc::new(MediaRoot::new(temp.path()).unwrap());
        let locks = Arc::new(
            PrivateLockStore::in_memory(root.path(), LockPolicy::default())
                .with_hash_params(argon2::Params::new(8, 1, 1, None).unwrap()),
        );
        (temp, StreamingEngine::new(root, locks.clone()), locks)
    }

    async fn collect(stream: MediaStream) -> Vec<u8> {
        let body = stream.into_body();
        tokio::pin!(body);
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(RangeRequest::parse(None), RangeRequest::Full);
        assert_eq!(RangeRequest::parse(Some("items=0-5")), RangeRequest::Full);
        assert_eq!(
            RangeRequest::parse(Some("bytes=10-19")),
            RangeRequest::Single(ByteRange::Bounded { start: 10, end: 19 })
        );
        assert_eq!(
            RangeRequest::parse(Some("bytes=0-")),
            RangeRequest::Single(ByteRange::From { start: 0 })
        );
        assert_eq!(
            RangeRequest::parse(Some("bytes=-500")),
            RangeRequest::Single(ByteRange::Suffix { len: 500 })
        );
        assert_eq!(RangeRequest::parse(Some("bytes=0-1,5-6")), RangeRequest::Unsatisfiable);
        assert_eq!(RangeRequest::parse(Some("bytes=abc-")), RangeRequest::Unsatisfiable);
        assert_eq!(RangeRequest::parse(Some("bytes=-")), RangeRequest::Unsatisfiable);
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(ByteRange::From { start: 0 }.resolve(100).unwrap(), (0, 99));
        assert_eq!(ByteRange::Bounded { start: 90, end: 500 }.resolve(100).unwrap(), (90, 99));
        assert_eq!(ByteRange::Suffix { len: 10 }.resolve(100).unwrap(), (90, 99));
        assert_eq!(ByteRange::Suffix { len: 1000 }.resolve(100).unwrap(), (0, 99));
        assert!(ByteRange::From { start: 100 }.resolve(100).is_err());
        assert!(ByteRange::Bounded { start: 100, end: 100 }.resolve(100).is_err());
        assert!(ByteRange::Bounded { start: 20, end: 10 }.resolve(100).is_err());
        assert!(ByteRange::Suffix { len: 0 }.resolve(100).is_err());
        assert!(ByteRange::From { start: 0 }.resolve(0).is_err());
    }

    #[tokio::test]
    async fn test_full_file() {
        let content = sample(700_000);
        let (_temp, engine, _) = setup(&content);
        let stream = engine
            .open(&p("videos/clip.mp4"), RangeRequest::Full, &SessionId::anonymous())
            .await
            .unwrap();
        assert!(stream.range.is_none());
        assert_eq!(stream.content_length, 700_000);
        assert_eq!(stream.content_type, "video/mp4");
        assert_eq!(collect(stream).await, content);
    }

    #[tokio::test]
    async fn test_open_ended_range_returns_whole_file() {
        let content = sample(1000);
        let (_temp, engine, _) = setup(&content);
        let stream = engine
            .open(
                &p("videos/clip.mp4"),
                RangeRequest::parse(Some("bytes=0-")),
                &SessionId::anonymous(),
            )
            .await
            .unwrap();
        assert_eq!(stream.range.unwrap().content_range(), "bytes 0-999/1000");
        assert_eq!(collect(stream).await.len(), 1000);
    }

    #[tokio::test]
    async fn test_bounded_range_is_byte_exact() {
        let content = sample(1000);
        let (_temp, engine, _) = setup(&content);
        let stream = engine
            .open(
                &p("videos/clip.mp4"),
                RangeRequest::parse(Some("bytes=10-19")),
                &SessionId::anonymous(),
            )
            .await
            .unwrap();
        assert_eq!(stream.content_length, 10);
        assert_eq!(collect(stream).await, content[10..20].to_vec());
    }

    #[tokio::test]
    async fn test_range_at_end_of_file_is_unsatisfiable() {
        let (_temp, engine, _) = setup(&sample(1000));
        let result = engine
            .open(
                &p("videos/clip.mp4"),
                RangeRequest::parse(Some("bytes=1000-1000")),
                &SessionId::anonymous(),
            )
            .await;
        assert!(matches!(result, Err(MediaError::RangeNotSatisfiable { size: 1000 })));
    }

    #[tokio::test]
    async fn test_concurrent_ranges_do_not_interfere() {
        let content = sample(2 * CHUNK_SIZE + 17);
        let (_temp, engine, _) = setup(&content);
        let engine = Arc::new(engine);
        let alice = SessionId::generate();
        let bob = SessionId::generate();

        let clip = p("videos/clip.mp4");
        let a = engine.open(&clip, RangeRequest::parse(Some("bytes=5-300000")), &alice);
        let b = engine.open(&clip, RangeRequest::parse(Some("bytes=-1000")), &bob);
        let (a, b) = tokio::join!(a, b);
        let (a, b) = tokio::join!(collect(a.unwrap()), collect(b.unwrap()));

        assert_eq!(a, content[5..=300_000].to_vec());
        assert_eq!(b, content[content.len() - 1000..].to_vec());
    }

    #[tokio::test]
    async fn test_locked_and_missing_files() {
        let (_temp, engine, locks) = setup(&sample(10));
        locks.set_private(&p("videos"), "pw").await.unwrap();
        let session = SessionId::generate();

        let result = engine
            .open(&p("videos/clip.mp4"), RangeRequest::Full, &session)
            .await;
        assert!(matches!(result, Err(MediaError::Locked)));

        locks.unlock(&p("videos"), "pw", &session).await.unwrap();
        assert!(engine
            .open(&p("videos/clip.mp4"), RangeRequest::Full, &session)
            .await
            .is_ok());
        assert!(matches!(
            engine.open(&p("videos/nope.mp4"), RangeRequest::Full, &session).await,
            Err(MediaError::NotFound)
        ));
        assert!(matches!(
            engine.open(&p("videos"), RangeRequest::Full, &session).await,
            Err(MediaError::NotFound)
        ));
    }
}
