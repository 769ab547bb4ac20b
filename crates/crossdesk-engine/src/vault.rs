//! Credential vault: encrypted tokens, expiry detection, refresh.
//!
//! Refresh is single-flight per (user, provider). Callers that find an
//! expired credential queue on one lock; the first refreshes and persists,
//! the rest reload the row and reuse the new token. The refresh-and-persist
//! step runs in its own task so a cancelled request cannot leave a rotated
//! refresh token unsaved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use crossdesk_core::{ConnectedProviders, Provider};
use crossdesk_providers::{TokenEndpoint, TokenGrant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::crypto::TokenCipher;
use crate::error::{EngineError, EngineResult};
use crate::store::{Credential, CredentialStore, FileCredentialStore};

/// Default margin subtracted from a token's lifetime, in seconds.
pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 60;

type LockMap = HashMap<(String, Provider), Arc<Mutex<()>>>;

struct VaultInner {
    store: Arc<dyn CredentialStore>,
    cipher: TokenCipher,
    tokens: Arc<dyn TokenEndpoint>,
    refresh_skew: Duration,
    locks: StdMutex<LockMap>,
}

/// Hands out valid access tokens, refreshing them when needed.
#[derive(Clone)]
pub struct CredentialVault {
    inner: Arc<VaultInner>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("refresh_skew", &self.inner.refresh_skew)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: TokenCipher,
        tokens: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self::with_refresh_skew(
            store,
            cipher,
            tokens,
            Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
        )
    }

    pub fn with_refresh_skew(
        store: Arc<dyn CredentialStore>,
        cipher: TokenCipher,
        tokens: Arc<dyn TokenEndpoint>,
        refresh_skew: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                store,
                cipher,
                tokens,
                refresh_skew,
                locks: StdMutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a vault over the JSON file store using the `[vault]` settings.
    pub fn from_config(
        config: &EngineConfig,
        tokens: Arc<dyn TokenEndpoint>,
    ) -> EngineResult<Self> {
        let secret = config
            .vault
            .secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| EngineError::config("vault.secret is required"))?;
        if config.vault.refresh_skew_secs < 0 {
            return Err(EngineError::config("vault.refresh_skew_secs cannot be negative"));
        }
        let store = FileCredentialStore::from_config(config);
        debug!(path = %store.path().display(), "opening credential store");
        Ok(Self::with_refresh_skew(
            Arc::new(store),
            TokenCipher::for_tokens(secret),
            tokens,
            config.refresh_skew(),
        ))
    }

    pub fn refresh_skew(&self) -> Duration {
        self.inner.refresh_skew
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn token_endpoint(&self) -> &Arc<dyn TokenEndpoint> {
        &self.inner.tokens
    }

    /// Loads the credential for (user, provider).
    pub async fn credential(&self, user_id: &str, provider: Provider) -> EngineResult<Credential> {
        self.inner
            .store
            .get(user_id, provider)
            .await?
            .ok_or(EngineError::CredentialMissing { provider })
    }

    /// Encrypts a fresh grant and stores it, replacing any prior credential.
    pub async fn save_grant(
        &self,
        user_id: &str,
        provider: Provider,
        grant: &TokenGrant,
    ) -> EngineResult<Credential> {
        let inner = &self.inner;
        let now = Utc::now();
        let requested = inner.tokens.scopes(provider);

        let credential = Credential {
            user_id: user_id.to_string(),
            provider,
            access_token: inner.encrypt(provider, &grant.access_token)?,
            refresh_token: grant
                .refresh_token
                .as_deref()
                .map(|token| inner.encrypt(provider, token))
                .transpose()?,
            expires_at: inner.expiry(now, grant.expires_in),
            scopes: grant.scopes_or(&requested),
            updated_at: now,
        };

        let lock = inner.lock_for(user_id, provider);
        let _guard = lock.lock().await;
        if inner.store.delete(user_id, provider).await? {
            debug!(user_id, %provider, "replaced existing credential");
        }
        inner.store.put(credential.clone()).await?;
        info!(
            user_id,
            %provider,
            has_refresh_token = credential.refresh_token.is_some(),
            "stored credential"
        );
        Ok(credential)
    }

    /// Returns a usable plaintext access token for `credential`.
    ///
    /// Without an expiry the stored token is returned as-is. An expiry that
    /// is not in the future triggers one refresh shared by every concurrent
    /// caller for the same (user, provider).
    pub async fn get_valid_access_token(&self, credential: &Credential) -> EngineResult<String> {
        let provider = credential.provider;
        if !credential.is_expired(Utc::now()) {
            return self.inner.decrypt(provider, &credential.access_token);
        }

        let lock = self.inner.lock_for(&credential.user_id, provider);
        let guard = lock.lock_owned().await;

        let inner = Arc::clone(&self.inner);
        let user_id = credential.user_id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            inner.refresh_locked(&user_id, provider).await
        })
        .await
        .map_err(|e| EngineError::RefreshFailed {
            provider,
            message: format!("refresh task failed: {}", e),
        })?
    }

    /// Loads the credential and returns a valid access token for it.
    pub async fn access_token(&self, user_id: &str, provider: Provider) -> EngineResult<String> {
        let credential = self.credential(user_id, provider).await?;
        self.get_valid_access_token(&credential).await
    }

    pub async fn connected_providers(&self, user_id: &str) -> EngineResult<ConnectedProviders> {
        let credentials = self.inner.store.list(user_id).await?;
        Ok(credentials.iter().map(|c| c.provider).collect())
    }

    /// Removes the credential for one provider.
    ///
    /// Waits for an in-flight refresh of the same credential to finish, so
    /// the refreshed row cannot be written back after the delete.
    pub async fn disconnect(&self, user_id: &str, provider: Provider) -> EngineResult<bool> {
        let removed = {
            let lock = self.inner.lock_for(user_id, provider);
            let _guard = lock.lock().await;
            self.inner.store.delete(user_id, provider).await?
        };
        self.inner.forget_lock(user_id, provider);
        if removed {
            info!(user_id, %provider, "disconnected provider");
        }
        Ok(removed)
    }

    /// Removes every credential of a user.
    pub async fn delete_user(&self, user_id: &str) -> EngineResult<usize> {
        // Always locked in `Provider::ALL` order.
        let locks: Vec<_> = Provider::ALL
            .iter()
            .map(|&provider| self.inner.lock_for(user_id, provider))
            .collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }
        let removed = self.inner.store.delete_user(user_id).await?;
        drop(guards);
        drop(locks);
        for provider in Provider::ALL {
            self.inner.forget_lock(user_id, provider);
        }
        Ok(removed)
    }
}

impl VaultInner {
    fn encrypt(&self, provider: Provider, plaintext: &str) -> EngineResult<String> {
        self.cipher
            .encrypt(plaintext)
            .map_err(|e| EngineError::credential_invalid(provider, e.to_string()))
    }

    fn decrypt(&self, provider: Provider, ciphertext: &str) -> EngineResult<String> {
        self.cipher.decrypt(ciphertext).map_err(|e| {
            warn!(%provider, error = %e, "stored token could not be decrypted");
            EngineError::credential_invalid(provider, e.to_string())
        })
    }

    fn expiry(&self, now: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
        expires_in.map(|secs| now + Duration::seconds(secs) - self.refresh_skew)
    }

    fn lock_for(&self, user_id: &str, provider: Provider) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry((user_id.to_string(), provider))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn forget_lock(&self, user_id: &str, provider: Provider) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (user_id.to_string(), provider);
        if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&key);
        }
    }

    /// Runs with the per-credential lock held.
    async fn refresh_locked(&self, user_id: &str, provider: Provider) -> EngineResult<String> {
        let current = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or(EngineError::CredentialMissing { provider })?;

        let now = Utc::now();
        if !current.is_expired(now) {
            debug!(user_id, %provider, "token already refreshed by a concurrent request");
            return self.decrypt(provider, &current.access_token);
        }

        let Some(encrypted_refresh) = current.refresh_token.as_deref() else {
            return Err(EngineError::RefreshRejected {
                provider,
                message: "no refresh token stored".to_string(),
            });
        };
        let refresh_token = self.decrypt(provider, encrypted_refresh)?;

        info!(user_id, %provider, "access token expired, refreshing");
        let grant = self
            .tokens
            .refresh(provider, &refresh_token)
            .await
            .map_err(|e| {
                warn!(user_id, %provider, error = %e, "token refresh failed");
                EngineError::from_refresh(provider, e)
            })?;

        let access_token = self.encrypt(provider, &grant.access_token)?;
        let refresh_token = match grant.refresh_token.as_deref() {
            Some(rotated) => Some(self.encrypt(provider, rotated)?),
            None => current.refresh_token.clone(),
        };
        let scopes = grant.scopes_or(&current.scopes);

        // The row may have been replaced or removed outside this vault while
        // the refresh call was in flight.
        match self.store.get(user_id, provider).await? {
            None => {
                warn!(user_id, %provider, "credential removed during refresh, discarding grant");
                return Err(EngineError::CredentialMissing { provider });
            }
            Some(latest) if latest.updated_at != current.updated_at => {
                warn!(user_id, %provider, "credential replaced during refresh, keeping newer row");
                return self.decrypt(provider, &latest.access_token);
            }
            Some(_) => {}
        }

        self.store
            .put(Credential {
                access_token,
                refresh_token,
                expires_at: self.expiry(now, grant.expires_in),
                scopes,
                updated_at: now,
                ..current
            })
            .await?;

        Ok(grant.access_token)
    }
}
