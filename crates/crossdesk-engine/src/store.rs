//! Credential persistence.
//!
//! A [`Credential`] holds only encrypted tokens; the store never sees
//! plaintext. At most one credential exists per (user, provider) and writes
//! replace in place.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crossdesk_core::Provider;
use crossdesk_providers::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Stored OAuth token pair plus metadata for one (user, provider).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub provider: Provider,
    /// Encrypted access token.
    pub access_token: String,
    /// Encrypted refresh token.
    pub refresh_token: Option<String>,
    /// When the access token stops being usable. `None` means assume valid.
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Returns true if the expiry is set and not in the future.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }

    fn key(&self) -> (String, Provider) {
        (self.user_id.clone(), self.provider)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &"[encrypted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[encrypted]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Persistence for credentials, keyed by (user, provider).
pub trait CredentialStore: Send + Sync {
    fn get<'a>(
        &'a self,
        user_id: &'a str,
        provider: Provider,
    ) -> BoxFuture<'a, EngineResult<Option<Credential>>>;

    /// Inserts or replaces the credential for its (user, provider).
    fn put(&self, credential: Credential) -> BoxFuture<'_, EngineResult<()>>;

    /// Removes one credential. Returns whether anything was removed.
    fn delete<'a>(&'a self, user_id: &'a str, provider: Provider)
    -> BoxFuture<'a, EngineResult<bool>>;

    /// Removes every credential of a user. Returns how many were removed.
    fn delete_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, EngineResult<usize>>;

    fn list<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, EngineResult<Vec<Credential>>>;
}

type CredentialMap = HashMap<(String, Provider), Credential>;

fn remove_user(map: &mut CredentialMap, user_id: &str) -> usize {
    let before = map.len();
    map.retain(|(user, _), _| user != user_id);
    before - map.len()
}

fn list_user(map: &CredentialMap, user_id: &str) -> Vec<Credential> {
    let mut credentials: Vec<_> = map
        .values()
        .filter(|c| c.user_id == user_id)
        .cloned()
        .collect();
    credentials.sort_by_key(|c| c.provider);
    credentials
}

/// In-memory store, for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<CredentialMap>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get<'a>(
        &'a self,
        user_id: &'a str,
        provider: Provider,
    ) -> BoxFuture<'a, EngineResult<Option<Credential>>> {
        Box::pin(async move {
            let map = self.credentials.read().await;
            Ok(map.get(&(user_id.to_string(), provider)).cloned())
        })
    }

    fn put(&self, credential: Credential) -> BoxFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            self.credentials
                .write()
                .await
                .insert(credential.key(), credential);
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        user_id: &'a str,
        provider: Provider,
    ) -> BoxFuture<'a, EngineResult<bool>> {
        Box::pin(async move {
            let mut map = self.credentials.write().await;
            Ok(map.remove(&(user_id.to_string(), provider)).is_some())
        })
    }

    fn delete_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, EngineResult<usize>> {
        Box::pin(async move {
            let mut map = self.credentials.write().await;
            Ok(remove_user(&mut map, user_id))
        })
    }

    fn list<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, EngineResult<Vec<Credential>>> {
        Box::pin(async move {
            let map = self.credentials.read().await;
            Ok(list_user(&map, user_id))
        })
    }
}

/// JSON file store.
///
/// The whole file is rewritten on every change: written to a temp file,
/// renamed over the original, and restricted to the owner on Unix.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Opens the store at `[vault].credentials_path`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.credentials_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> EngineResult<CredentialMap> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no credential file at {:?}", self.path);
                return Ok(CredentialMap::new());
            }
            Err(e) => {
                return Err(EngineError::store(format!(
                    "failed to read credential file: {}",
                    e
                )));
            }
        };

        let credentials: Vec<Credential> = serde_json::from_str(&content).map_err(|e| {
            EngineError::store(format!("failed to parse credential file: {}", e))
        })?;
        Ok(credentials.into_iter().map(|c| (c.key(), c)).collect())
    }

    async fn save(&self, map: &CredentialMap) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::store(format!("failed to create credential directory: {}", e))
            })?;
        }

        let mut credentials: Vec<&Credential> = map.values().collect();
        credentials.sort_by(|a, b| (&a.user_id, a.provider).cmp(&(&b.user_id, b.provider)));
        let content = serde_json::to_string_pretty(&credentials)
            .map_err(|e| EngineError::store(format!("failed to serialize credentials: {}", e)))?;

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| EngineError::store(format!("failed to write credential file: {}", e)))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| EngineError::store(format!("failed to rename credential file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = tokio::fs::set_permissions(&self.path, perms).await;
        }

        debug!(count = credentials.len(), "saved credentials to {:?}", self.path);
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get<'a>(
        &'a self,
        user_id: &'a str,
        provider: Provider,
    ) -> BoxFuture<'a, EngineResult<Option<Credential>>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut map = self.load().await?;
            Ok(map.remove(&(user_id.to_string(), provider)))
        })
    }

    fn put(&self, credential: Credential) -> BoxFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut map = self.load().await?;
            map.insert(credential.key(), credential);
            self.save(&map).await
        })
    }

    fn delete<'a>(
        &'a self,
        user_id: &'a str,
        provider: Provider,
    ) -> BoxFuture<'a, EngineResult<bool>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut map = self.load().await?;
            let removed = map.remove(&(user_id.to_string(), provider)).is_some();
            if removed {
                self.save(&map).await?;
                info!(user_id, %provider, "removed credential");
            }
            Ok(removed)
        })
    }

    fn delete_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, EngineResult<usize>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut map = self.load().await?;
            let removed = remove_user(&mut map, user_id);
            if removed > 0 {
                self.save(&map).await?;
                info!(user_id, removed, "removed all credentials of user");
            }
            Ok(removed)
        })
    }

    fn list<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, EngineResult<Vec<Credential>>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let map = self.load().await?;
            Ok(list_user(&map, user_id))
        })
    }
}
