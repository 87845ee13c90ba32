//! Shared types for REST API
//!
//! Query strings and response bodies used across the endpoint modules.
//! Paths are always root-relative strings; the empty string is the root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// QUERIES
// ============================================================================

#[derive(Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    /// Destination directory.
    #[serde(default)]
    pub path: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct MkdirQuery {
    #[serde(default)]
    pub parent: String,
    pub name: String,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct RemoveDirQuery {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Deserialize)]
pub struct PrivateQuery {
    #[serde(default)]
    pub path: String,
    pub password: Option<String>,
}

/// `application/x-www-form-urlencoded` alternative to `?password=`.
#[derive(Deserialize)]
pub struct PasswordForm {
    pub password: String,
}

// ============================================================================
// PRIVATE DIRECTORY RESPONSES
// ============================================================================

#[derive(Serialize)]
pub struct LockResponse {
    pub path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct UnlockResponse {
    /// Directory the grant was issued for; absent when nothing was protected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct RelockResponse {
    pub path: String,
    pub revoked: usize,
}

#[derive(Serialize)]
pub struct RemovePrivateResponse {
    pub path: String,
    pub removed: bool,
}

#[derive(Serialize)]
pub struct PrivateDirectoryResponse {
    pub path: String,
    pub created_at: DateTime<Utc>,
}
