use rand::RngCore;
use std::fmt;

/// Cookie carrying the client session token.
pub const SESSION_COOKIE: &str = "nas_media_session";

const TOKEN_BYTES: usize = 32;

/// Opaque identifier for a browser session.
///
/// Grants are keyed by it; it carries no authority on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random token (32 bytes, hex encoded).
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Accept a token presented by a client, if it is well formed.
    pub fn from_token(token: &str) -> Option<Self> {
        if token.len() == TOKEN_BYTES * 2 && token.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(token.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Session used when the client presented no cookie.
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Log only a prefix of the token.
        let end = self.0.len().min(8);
        write!(f, "{}", &self.0[..end])
    }
}
