use std::path::PathBuf;
use std::time::Duration;

use crate::media::{ConflictPolicy, LockPolicy};

#[derive(Clone, Debug)]
pub struct Config {
    pub video_dir: PathBuf,
    pub bind_addr: String,
    pub port: u16,
    /// Holds the private directory registry; kept outside the media root.
    pub state_dir: PathBuf,
    pub grant_ttl_secs: u64,
    pub unlock_max_failures: u32,
    pub unlock_window_secs: u64,
    pub unlock_cooldown_secs: u64,
    pub upload_conflict: ConflictPolicy,
    pub cors_origins: Vec<String>,
}

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            video_dir: std::env::var("NAS_MEDIA_VIDEO_DIR")
                .unwrap_or_else(|_| "/mnt".to_string())
                .into(),
            bind_addr: std::env::var("NAS_MEDIA_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("NAS_MEDIA_PORT")
                .unwrap_or_else(|_| "8800".to_string())
                .parse()?,
            state_dir: match std::env::var("NAS_MEDIA_STATE_DIR") {
                Ok(dir) => PathBuf::from(dir),
                Err(_) => dirs::data_local_dir()
                    .map(|d| d.join("nas-media"))
                    .unwrap_or_else(|| PathBuf::from("./data")),
            },
            grant_ttl_secs: std::env::var("NAS_MEDIA_GRANT_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
            unlock_max_failures: std::env::var("NAS_MEDIA_UNLOCK_MAX_FAILURES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            unlock_window_secs: std::env::var("NAS_MEDIA_UNLOCK_WINDOW_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            unlock_cooldown_secs: std::env::var("NAS_MEDIA_UNLOCK_COOLDOWN_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            upload_conflict: std::env::var("NAS_MEDIA_UPLOAD_CONFLICT")
                .unwrap_or_else(|_| "overwrite".to_string())
                .parse()?,
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            grant_ttl: Duration::from_secs(self.grant_ttl_secs),
            max_failures: self.unlock_max_failures,
            failure_window: Duration::from_secs(self.unlock_window_secs),
            cooldown: Duration::from_secs(self.unlock_cooldown_secs),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join(crate::media::REGISTRY_FILE)
    }

    /// Configuration rooted at `video_dir`, for tests.
    #[cfg(test)]
    pub fn for_root(video_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Config {
            video_dir: video_dir.into(),
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            state_dir: state_dir.into(),
            grant_ttl_secs: 3600,
            unlock_max_failures: 5,
            unlock_window_secs: 300,
            unlock_cooldown_secs: 60,
            upload_conflict: ConflictPolicy::Overwrite,
            cors_origins: vec![],
        }
    }
}
