//! Private directory lock store
//!
//! Holds the password-protected directories, their salted credential
//! hashes and the volatile unlock grants handed to client sessions.
//!
//! ## Access rule
//!
//! A path is readable by a session when the session holds a live grant for
//! every private directory on the chain from the root down to that path.
//! A grant on `movies` therefore covers `movies/kids/cartoon.mp4`, unless
//! `movies/kids` is private in its own right.
//!
//! ## Concurrency
//!
//! All state sits behind one `tokio::sync::RwLock`: access checks take the
//! read side, lock/unlock/remove take the write side. Password hashing runs
//! on the blocking pool with no lock held.
//!
//! ## Persistence
//!
//! Records (never grants) are mirrored to a JSON registry, rewritten
//! atomically on every change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::error::{MediaError, MediaResult};
use super::resolver::MediaPath;
use crate::auth::{self, SessionId};

/// File name of the registry inside the state directory.
pub const REGISTRY_FILE: &str = "private_dirs.json";

const REGISTRY_VERSION: u32 = 1;

/// Tunables for grants and brute-force throttling.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    pub grant_ttl: Duration,
    /// Failed unlocks tolerated per directory within `failure_window`.
    /// Zero disables throttling.
    pub max_failures: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            grant_ttl: Duration::from_secs(3600),
            max_failures: 5,
            failure_window: Duration::from_secs(300),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// A password-protected directory.
#[derive(Debug, Clone, Serialize)]
pub struct PrivateDirectory {
    pub path: MediaPath,
    #[serde(skip)]
    password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Nothing on the path is private.
    Unprotected,
    Unlocked { path: MediaPath, expires_in: Duration },
}

/// Point-in-time copy of which private directories a session may enter.
///
/// Used by synchronous tree walks that cannot await the store.
#[derive(Debug, Clone, Default)]
pub struct AccessView {
    granted: BTreeMap<MediaPath, bool>,
}

impl AccessView {
    pub fn is_private(&self, path: &MediaPath) -> bool {
        self.granted.contains_key(path)
    }

    pub fn can_access(&self, path: &MediaPath) -> bool {
        path.chain()
            .iter()
            .all(|p| self.granted.get(p).copied().unwrap_or(true))
    }

    /// Whether the entry at `path` shows up in its parent's listing.
    pub fn can_see(&self, path: &MediaPath) -> bool {
        let chain = path.chain();
        let ancestors = &chain[..chain.len().saturating_sub(1)];
        ancestors
            .iter()
            .all(|p| self.granted.get(p).copied().unwrap_or(true))
    }
}

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    directories: BTreeMap<String, RegistryRecord>,
}

#[derive(Serialize, Deserialize)]
struct RegistryRecord {
    password_hash: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct FailureWindow {
    started: Instant,
    failures: u32,
    locked_until: Option<Instant>,
}

#[derive(Default)]
struct LockState {
    records: BTreeMap<MediaPath, PrivateDirectory>,
    grants: HashMap<(MediaPath, SessionId), Instant>,
    failures: HashMap<MediaPath, FailureWindow>,
}

impl LockState {
    fn has_grant(&self, path: &MediaPath, session: &SessionId, now: Instant) -> bool {
        self.grants
            .get(&(path.clone(), session.clone()))
            .is_some_and(|expiry| *expiry > now)
    }

    /// Private directories on the chain the session has not unlocked,
    /// outermost first.
    fn denied(&self, path: &MediaPath, session: &SessionId, now: Instant) -> Vec<MediaPath> {
        path.chain()
            .into_iter()
            .filter(|p| self.records.contains_key(p) && !self.has_grant(p, session, now))
            .collect()
    }

    fn drop_paths(&mut self, doomed: &[MediaPath]) {
        for path in doomed {
            self.records.remove(path);
            self.failures.remove(path);
        }
        self.grants.retain(|(path, _), _| !doomed.contains(path));
    }

    fn cooldown_remaining(&self, path: &MediaPath, now: Instant) -> Option<Duration> {
        let window = self.failures.get(path)?;
        let until = window.locked_until?;
        (until > now).then(|| until - now)
    }

    fn register_failure(&mut self, path: &MediaPath, policy: &LockPolicy, now: Instant) {
        if policy.max_failures == 0 {
            return;
        }
        let window = self.failures.entry(path.clone()).or_insert(FailureWindow {
            started: now,
            failures: 0,
            locked_until: None,
        });

        let expired_lockout = window.locked_until.is_some_and(|until| until <= now);
        if expired_lockout || now.duration_since(window.started) > policy.failure_window {
            window.started = now;
            window.failures = 0;
            window.locked_until = None;
        }

        window.failures = window.failures.saturating_add(1);
        if window.failures >= policy.max_failures {
            window.locked_until = Some(now + policy.cooldown);
            tracing::warn!(path = %path, "unlock attempts throttled");
        }
    }

    fn to_registry(&self) -> RegistryFile {
        RegistryFile {
            version: REGISTRY_VERSION,
            directories: self
                .records
                .values()
                .map(|r| {
                    (
                        r.path.to_string(),
                        RegistryRecord {
                            password_hash: r.password_hash.clone(),
                            created_at: r.created_at,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Store of private directories and unlock grants.
pub struct PrivateLockStore {
    /// Canonical media root, used to detect orphaned records.
    root: PathBuf,
    registry: Option<PathBuf>,
    policy: LockPolicy,
    hash_params: argon2::Params,
    state: RwLock<LockState>,
}

impl PrivateLockStore {
    /// Store without persistence.
    pub fn in_memory(root: impl Into<PathBuf>, policy: LockPolicy) -> Self {
        Self {
            root: root.into(),
            registry: None,
            policy,
            hash_params: argon2::Params::default(),
            state: RwLock::new(LockState::default()),
        }
    }

    /// Load (or start) the registry at `registry`.
    ///
    /// A registry that cannot be parsed is an error: starting empty would
    /// silently expose every protected directory.
    pub async fn open(
        root: impl Into<PathBuf>,
        registry: impl Into<PathBuf>,
        policy: LockPolicy,
    ) -> anyhow::Result<Self> {
        let registry = registry.into();
        let mut state = LockState::default();

        match tokio::fs::read_to_string(&registry).await {
            Ok(raw) => {
                let file: RegistryFile = serde_json::from_str(&raw).map_err(|e| {
                    anyhow::anyhow!("corrupt private registry {}: {}", registry.display(), e)
                })?;
                for (raw_path, record) in file.directories {
                    let Ok(path) = MediaPath::parse(&raw_path) else {
                        tracing::warn!(path = %raw_path, "dropping invalid private registry entry");
                        continue;
                    };
                    state.records.insert(
                        path.clone(),
                        PrivateDirectory {
                            path,
                            password_hash: record.password_hash,
                            created_at: record.created_at,
                        },
                    );
                }
                tracing::info!(
                    count = state.records.len(),
                    "loaded private directories from {}",
                    registry.display()
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            root: root.into(),
            registry: Some(registry),
            policy,
            hash_params: argon2::Params::default(),
            state: RwLock::new(state),
        })
    }

    /// Override the argon2 cost used for new hashes.
    pub fn with_hash_params(mut self, params: argon2::Params) -> Self {
        self.hash_params = params;
        self
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Mark `path` private, replacing any previous password.
    ///
    /// Replacing revokes every grant issued under the old password.
    pub async fn set_private(&self, path: &MediaPath, password: &str) -> MediaResult<PrivateDirectory> {
        if password.is_empty() {
            return Err(MediaError::InvalidCredential);
        }
        if !self.is_directory(path).await? {
            return Err(MediaError::NotFound);
        }

        let params = self.hash_params.clone();
        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || auth::hash_password_with(params, &password))
            .await
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))?
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))?;

        let record = PrivateDirectory {
            path: path.clone(),
            password_hash,
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        let previous = state.records.insert(path.clone(), record.clone());
        if let Err(e) = self.persist(&state).await {
            match previous {
                Some(previous) => state.records.insert(path.clone(), previous),
                None => state.records.remove(path),
            };
            return Err(e);
        }
        state.grants.retain(|(p, _), _| p != path);
        state.failures.remove(path);

        tracing::info!(path = %path, "directory marked private");
        Ok(record)
    }

    /// Drop the record for `path` together with its grants.
    ///
    /// Returns whether a record existed.
    pub async fn remove_private(&self, path: &MediaPath) -> MediaResult<bool> {
        let mut state = self.state.write().await;
        let Some(previous) = state.records.remove(path) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&state).await {
            state.records.insert(path.clone(), previous);
            return Err(e);
        }
        state.drop_paths(std::slice::from_ref(path));

        tracing::info!(path = %path, "directory no longer private");
        Ok(true)
    }

    /// Verify `password` and grant `session` access.
    ///
    /// The directory unlocked is the outermost one on the path's chain the
    /// session cannot yet enter, or the innermost one when all are already
    /// granted (refreshing that grant).
    pub async fn unlock(
        &self,
        path: &MediaPath,
        password: &str,
        session: &SessionId,
    ) -> MediaResult<UnlockOutcome> {
        self.prune_orphans(path.chain()).await?;

        let (target, stored_hash) = {
            let state = self.state.read().await;
            let now = Instant::now();
            let target = state.denied(path, session, now).into_iter().next().or_else(|| {
                path.chain()
                    .into_iter()
                    .rev()
                    .find(|p| state.records.contains_key(p))
            });
            let Some(target) = target else {
                return Ok(UnlockOutcome::Unprotected);
            };
            if let Some(remaining) = state.cooldown_remaining(&target, now) {
                return Err(MediaError::TooManyAttempts {
                    retry_after: remaining.as_secs().max(1),
                });
            }
            let hash = state.records[&target].password_hash.clone();
            (target, hash)
        };

        let candidate = password.to_string();
        let hash = stored_hash.clone();
        let verified = tokio::task::spawn_blocking(move || auth::verify_password(&candidate, &hash))
            .await
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))?
            .unwrap_or_else(|e| {
                tracing::error!(path = %target, "stored password hash unusable: {}", e);
                false
            });

        let mut state = self.state.write().await;
        let now = Instant::now();
        // The password may have been replaced while verifying.
        let still_current = state
            .records
            .get(&target)
            .is_some_and(|r| r.password_hash == stored_hash);

        if !verified || !still_current {
            state.register_failure(&target, &self.policy, now);
            tracing::warn!(path = %target, session = %session, "invalid directory password");
            return Err(MediaError::InvalidCredential);
        }

        state.grants.retain(|_, expiry| *expiry > now);
        state
            .grants
            .insert((target.clone(), session.clone()), now + self.policy.grant_ttl);
        state.failures.remove(&target);

        tracing::info!(path = %target, session = %session, "directory unlocked");
        Ok(UnlockOutcome::Unlocked {
            path: target,
            expires_in: self.policy.grant_ttl,
        })
    }

    /// Revoke the session's grants on and beneath `path`, and on the
    /// private directories enclosing it. Returns how many were dropped.
    pub async fn relock(&self, path: &MediaPath, session: &SessionId) -> usize {
        let chain = path.chain();
        let mut state = self.state.write().await;
        let before = state.grants.len();
        state.grants.retain(|(p, s), _| {
            !(s == session && (p.starts_with(path) || chain.contains(p)))
        });
        before - state.grants.len()
    }

    /// `Ok` when the session may read `path`, `Locked` otherwise.
    pub async fn check_access(&self, path: &MediaPath, session: &SessionId) -> MediaResult<()> {
        let denied = {
            let state = self.state.read().await;
            state.denied(path, session, Instant::now())
        };
        if denied.is_empty() {
            return Ok(());
        }

        let pruned = self.prune_orphans(denied.clone()).await?;
        if pruned.len() == denied.len() {
            Ok(())
        } else {
            Err(MediaError::Locked)
        }
    }

    #[cfg(test)]
    pub async fn is_unlocked(&self, path: &MediaPath, session: &SessionId) -> bool {
        self.check_access(path, session).await.is_ok()
    }

    #[cfg(test)]
    pub async fn is_private(&self, path: &MediaPath) -> bool {
        self.state.read().await.records.contains_key(path)
    }

    /// Snapshot of access decisions for `session`.
    pub async fn view(&self, session: &SessionId) -> AccessView {
        let state = self.state.read().await;
        let now = Instant::now();
        AccessView {
            granted: state
                .records
                .keys()
                .map(|p| (p.clone(), state.has_grant(p, session, now)))
                .collect(),
        }
    }

    /// Private directories at or beneath `path`.
    pub async fn records_under(&self, path: &MediaPath) -> Vec<MediaPath> {
        let state = self.state.read().await;
        state
            .records
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect()
    }

    /// Forget every record at or beneath `path` (the tree was deleted).
    pub async fn forget_subtree(&self, path: &MediaPath) -> MediaResult<usize> {
        let mut state = self.state.write().await;
        let doomed: Vec<MediaPath> = state
            .records
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        state.drop_paths(&doomed);
        self.persist(&state).await?;
        Ok(doomed.len())
    }

    /// All live private directories, orphans pruned.
    pub async fn list(&self) -> MediaResult<Vec<PrivateDirectory>> {
        let all: Vec<MediaPath> = self.state.read().await.records.keys().cloned().collect();
        self.prune_orphans(all).await?;
        Ok(self.state.read().await.records.values().cloned().collect())
    }

    /// Private directories `session` may know about: those whose parent it
    /// can list. Records nested in a locked tree stay hidden.
    pub async fn list_visible(&self, session: &SessionId) -> MediaResult<Vec<PrivateDirectory>> {
        let all = self.list().await?;
        let view = self.view(session).await;
        Ok(all.into_iter().filter(|d| view.can_see(&d.path)).collect())
    }

    async fn is_directory(&self, path: &MediaPath) -> MediaResult<bool> {
        let probe = tokio::fs::metadata(path.to_fs(&self.root)).await;
        Ok(directory_exists(probe)?)
    }

    /// Drop records among `candidates` whose directory no longer exists.
    async fn prune_orphans(&self, candidates: Vec<MediaPath>) -> MediaResult<Vec<MediaPath>> {
        let mut orphans = Vec::new();
        {
            let state = self.state.read().await;
            for path in candidates {
                if state.records.contains_key(&path) && !self.is_directory(&path).await? {
                    orphans.push(path);
                }
            }
        }
        if orphans.is_empty() {
            return Ok(orphans);
        }

        let mut state = self.state.write().await;
        state.drop_paths(&orphans);
        self.persist(&state).await?;
        for path in &orphans {
            tracing::info!(path = %path, "pruned private record for missing directory");
        }
        Ok(orphans)
    }

    async fn persist(&self, state: &LockState) -> MediaResult<()> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&state.to_registry())
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))?;
        write_atomic(registry, &json).await?;
        Ok(())
    }
}

/// Only a definite "gone" counts as missing; any other error is reported.
fn directory_exists(probe: std::io::Result<std::fs::Metadata>) -> std::io::Result<bool> {
    match probe {
        Ok(metadata) => Ok(metadata.is_dir()),
        Err(e) if matches!(
            e.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
        ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await
}
