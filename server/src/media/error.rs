use thiserror::Error;

/// Failures produced by the media engine.
///
/// Messages are safe to show to clients: none of them embed absolute
/// filesystem paths. `Io` carries the underlying error for server-side logs.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("invalid path")]
    PathViolation,
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("not found")]
    NotFound,
    #[error("directory is locked")]
    Locked,
    #[error("invalid password")]
    InvalidCredential,
    #[error("too many failed attempts, retry in {retry_after}s")]
    TooManyAttempts { retry_after: u64 },
    #[error("already exists")]
    AlreadyExists,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("range not satisfiable")]
    RangeNotSatisfiable { size: u64 },
    #[error("transfer aborted: {0}")]
    Aborted(String),
    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => MediaError::NotFound,
            _ => MediaError::Io(err),
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
