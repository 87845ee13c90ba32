//! Path resolution under the media root
//!
//! Every client-supplied path passes through here before any filesystem
//! call. A `MediaPath` is the validated, root-relative form; `MediaRoot`
//! turns it into a canonical filesystem path and proves the result is still
//! inside the root after symlinks are followed.

use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use super::error::{MediaError, MediaResult};

/// Characters that may never appear in a directory or file name.
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Longest accepted single name, in bytes.
const MAX_NAME_BYTES: usize = 255;

/// A validated path relative to the media root.
///
/// The empty path is the root itself. Segments are never empty, `.` or `..`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaPath(Vec<String>);

impl MediaPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a client-supplied path such as `movies/2024/clip.mp4`.
    pub fn parse(input: &str) -> MediaResult<Self> {
        if input.is_empty() {
            return Ok(Self::root());
        }
        if input.starts_with('/') {
            return Err(MediaError::PathViolation);
        }

        let mut segments = Vec::new();
        for segment in input.split('/') {
            check_segment(segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self(segments))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Final segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Append one segment.
    ///
    /// Only the structure is checked: names already on disk may use
    /// characters `validate_name` refuses for new entries.
    pub fn join(&self, name: &str) -> MediaResult<MediaPath> {
        check_segment(name)?;
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Ok(Self(segments))
    }

    /// True if `self` equals `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &MediaPath) -> bool {
        self.0.len() >= ancestor.0.len() && self.0[..ancestor.0.len()] == ancestor.0[..]
    }

    /// Every path from the root down to and including `self`.
    pub fn chain(&self) -> Vec<MediaPath> {
        (0..=self.0.len())
            .map(|depth| Self(self.0[..depth].to_vec()))
            .collect()
    }

    /// Any segment is a dot-name (hidden from clients).
    pub fn is_hidden(&self) -> bool {
        self.0.iter().any(|s| s.starts_with('.'))
    }

    pub(crate) fn to_fs(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for segment in &self.0 {
            path.push(segment);
        }
        path
    }

    /// Rebuild a media path from a filesystem path relative to the root.
    fn from_relative(relative: &Path) -> MediaResult<Self> {
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(os) => {
                    let segment = os.to_str().ok_or(MediaError::PathViolation)?;
                    segments.push(segment.to_string());
                }
                _ => return Err(MediaError::PathViolation),
            }
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for MediaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl Serialize for MediaPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn check_segment(segment: &str) -> MediaResult<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(MediaError::PathViolation);
    }
    if segment.contains('\\') || segment.contains('\0') {
        return Err(MediaError::PathViolation);
    }
    // Drive prefixes and root markers show up as non-Normal components.
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(MediaError::PathViolation),
    }
}

/// Validate a single new directory or file name.
///
/// Separators and traversal names are path violations; everything else
/// that makes a poor name is reported as `InvalidName`.
pub fn validate_name(name: &str) -> MediaResult<()> {
    if name.is_empty() {
        return Err(MediaError::InvalidName("name cannot be empty".into()));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(MediaError::PathViolation);
    }
    if name.starts_with('.') {
        return Err(MediaError::InvalidName("name cannot start with '.'".into()));
    }
    if name.trim() != name {
        return Err(MediaError::InvalidName(
            "name cannot start or end with whitespace".into(),
        ));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(MediaError::InvalidName("name is too long".into()));
    }
    if name.chars().any(|c| c.is_control() || FORBIDDEN_NAME_CHARS.contains(&c)) {
        return Err(MediaError::InvalidName(
            "name contains invalid characters (\\/:*?\"<>|)".into(),
        ));
    }
    check_segment(name)
}

/// A path proven to be inside the media root.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Canonical root-relative path, after symlinks were followed.
    pub media: MediaPath,
    /// Canonical absolute filesystem path.
    pub fs: PathBuf,
}

/// The single directory tree the service exposes.
#[derive(Debug)]
pub struct MediaRoot {
    root: PathBuf,
}

impl MediaRoot {
    /// Canonicalize `path` and require it to be a directory.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(path.as_ref())?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("media root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Parse and resolve a raw client string.
    pub async fn resolve_str(&self, input: &str) -> MediaResult<Resolved> {
        let path = MediaPath::parse(input).inspect_err(|_| {
            tracing::warn!(input = %input, "rejected malformed media path");
        })?;
        self.resolve(&path).await
    }

    /// Resolve an existing path and confirm it has not escaped the root.
    pub async fn resolve(&self, path: &MediaPath) -> MediaResult<Resolved> {
        if path.is_hidden() {
            return Err(MediaError::NotFound);
        }

        let canonical = tokio::fs::canonicalize(path.to_fs(&self.root)).await?;
        let relative = match canonical.strip_prefix(&self.root) {
            Ok(relative) => relative,
            Err(_) => {
                tracing::warn!(path = %path, "path escapes the media root");
                return Err(MediaError::PathViolation);
            }
        };

        let media = MediaPath::from_relative(relative).inspect_err(|_| {
            tracing::warn!(path = %path, "path resolves to a non UTF-8 location");
        })?;
        if media.is_hidden() {
            return Err(MediaError::NotFound);
        }

        Ok(Resolved { media, fs: canonical })
    }

    /// Resolve a path that must be a directory.
    pub async fn resolve_dir(&self, path: &MediaPath) -> MediaResult<Resolved> {
        let resolved = self.resolve(path).await?;
        if !tokio::fs::metadata(&resolved.fs).await?.is_dir() {
            return Err(MediaError::NotFound);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_valid_paths() {
        assert!(MediaPath::parse("").unwrap().is_root());
        let path = MediaPath::parse("movies/summer 2024/clip.mp4").unwrap();
        assert_eq!(path.chain().len(), 4);
        assert_eq!(path.to_string(), "movies/summer 2024/clip.mp4");
        assert_eq!(path.name(), Some("clip.mp4"));
    }

    #[test]
    fn test_parse_rejects_traversal() {
        for bad in ["..", "../etc", "a/../b", "a/..", ".", "a/./b"] {
            assert!(
                matches!(MediaPath::parse(bad), Err(MediaError::PathViolation)),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_absolute_and_malformed() {
        for bad in ["/etc/passwd", "/", "a//b", "a/", "a\\b", "a\0b"] {
            assert!(
                matches!(MediaPath::parse(bad), Err(MediaError::PathViolation)),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_chain_and_ancestry() {
        let path = MediaPath::parse("a/b/c").unwrap();
        let chain: Vec<String> = path.chain().iter().map(|p| p.to_string()).collect();
        assert_eq!(chain, vec!["", "a", "a/b", "a/b/c"]);

        let a = MediaPath::parse("a").unwrap();
        assert!(path.starts_with(&a));
        assert!(path.starts_with(&MediaPath::root()));
        assert!(!a.starts_with(&path));
        assert!(!MediaPath::parse("ab").unwrap().starts_with(&a));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Holiday Videos").is_ok());
        assert!(validate_name("clip.final.mp4").is_ok());
        assert!(matches!(validate_name("a/b"), Err(MediaError::PathViolation)));
        assert!(matches!(validate_name(".."), Err(MediaError::PathViolation)));
        assert!(matches!(validate_name("..\\x"), Err(MediaError::PathViolation)));
        assert!(matches!(validate_name(""), Err(MediaError::InvalidName(_))));
        assert!(matches!(validate_name(".hidden"), Err(MediaError::InvalidName(_))));
        assert!(matches!(validate_name("what?"), Err(MediaError::InvalidName(_))));
        assert!(matches!(validate_name(" padded "), Err(MediaError::InvalidName(_))));
        assert!(matches!(validate_name(&"x".repeat(300)), Err(MediaError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_resolve_inside_root() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("movies")).unwrap();
        std::fs::write(temp.path().join("movies/a.mp4"), b"x").unwrap();

        let root = MediaRoot::new(temp.path()).unwrap();
        let resolved = root.resolve_str("movies/a.mp4").await.unwrap();
        assert_eq!(resolved.media.to_string(), "movies/a.mp4");
        assert!(resolved.fs.starts_with(root.path()));

        let top = root.resolve_str("").await.unwrap();
        assert!(top.media.is_root());
        assert_eq!(top.fs, root.path());
    }

    #[tokio::test]
    async fn test_resolve_missing_and_hidden() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(".secret"), b"x").unwrap();
        let root = MediaRoot::new(temp.path()).unwrap();

        assert!(matches!(root.resolve_str("nope").await, Err(MediaError::NotFound)));
        assert!(matches!(root.resolve_str(".secret").await, Err(MediaError::NotFound)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_escape() {
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("passwd"), b"root").unwrap();

        let temp = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();
        let root = MediaRoot::new(temp.path()).unwrap();

        assert!(matches!(
            root.resolve_str("escape/passwd").await,
            Err(MediaError::PathViolation)
        ));
        assert!(matches!(root.resolve_str("escape").await, Err(MediaError::PathViolation)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_follows_internal_symlink_to_canonical_path() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("private/inner")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("private"), temp.path().join("alias"))
            .unwrap();
        let root = MediaRoot::new(temp.path()).unwrap();

        let resolved = root.resolve_str("alias/inner").await.unwrap();
        assert_eq!(resolved.media.to_string(), "private/inner");
    }

    #[tokio::test]
    async fn test_resolve_dir_rejects_files() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a.mp4"), b"x").unwrap();
        let root = MediaRoot::new(temp.path()).unwrap();

        let path = MediaPath::parse("a.mp4").unwrap();
        assert!(matches!(root.resolve_dir(&path).await, Err(MediaError::NotFound)));
    }
}
