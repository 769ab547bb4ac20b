//! OAuth connect flow: consent URL out, authorization code back in.
//!
//! The `state` parameter is an AES-GCM sealed JSON payload naming the user,
//! the provider and an expiry. It is opaque to the browser and cannot be
//! forged without the vault secret.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use crossdesk_core::Provider;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::crypto::TokenCipher;
use crate::error::{EngineError, EngineResult};
use crate::store::Credential;
use crate::vault::CredentialVault;

/// Default lifetime of an issued `state`.
pub const DEFAULT_STATE_TTL_SECS: i64 = 600;

#[derive(Debug, Serialize, Deserialize)]
struct StatePayload {
    sub: String,
    provider: Provider,
    /// Unix seconds.
    exp: i64,
}

/// Outcome of a completed callback.
#[derive(Debug, Clone)]
pub struct Connected {
    pub user_id: String,
    pub provider: Provider,
    pub credential: Credential,
}

pub struct ConnectFlow {
    vault: CredentialVault,
    state_cipher: TokenCipher,
    ttl: Duration,
}

impl std::fmt::Debug for ConnectFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectFlow")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ConnectFlow {
    pub fn new(vault: CredentialVault, secret: &str) -> Self {
        Self {
            vault,
            state_cipher: TokenCipher::derive(secret, "state"),
            ttl: Duration::seconds(DEFAULT_STATE_TTL_SECS),
        }
    }

    /// Creates the flow from `[vault].secret` and `[oauth].state_ttl_secs`.
    pub fn from_config(vault: CredentialVault, config: &EngineConfig) -> EngineResult<Self> {
        let secret = config
            .vault
            .secret
            .as_deref()
            .ok_or_else(|| EngineError::config("vault.secret is required"))?;
        Ok(Self::new(vault, secret).with_ttl(config.state_ttl()))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Builds the provider consent URL for `user_id`.
    pub fn authorize_url(
        &self,
        user_id: &str,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> EngineResult<String> {
        let state = self.issue_state(user_id, provider, now)?;
        let url = self
            .vault
            .token_endpoint()
            .authorize_url(provider, &state)?;
        info!(user_id, %provider, "issued authorization URL");
        Ok(url)
    }

    /// Handles the provider callback.
    ///
    /// Verifies `state`, exchanges `code` and stores the new credential in
    /// place of any previous one.
    pub async fn complete(
        &self,
        provider: Provider,
        code: &str,
        state: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Connected> {
        let user_id = self.verify_state(state, provider, now)?;
        if code.trim().is_empty() {
            return Err(EngineError::InvalidState("missing authorization code".into()));
        }

        let grant = self
            .vault
            .token_endpoint()
            .exchange_code(provider, code)
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, %provider, error = %e, "authorization code exchange failed");
                EngineError::from(e.with_provider(provider))
            })?;

        let credential = self.vault.save_grant(&user_id, provider, &grant).await?;
        info!(user_id = %user_id, %provider, "connected provider");
        Ok(Connected {
            user_id,
            provider,
            credential,
        })
    }

    fn issue_state(&self, user_id: &str, provider: Provider, now: DateTime<Utc>) -> EngineResult<String> {
        let payload = StatePayload {
            sub: user_id.to_string(),
            provider,
            exp: (now + self.ttl).timestamp(),
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| EngineError::InvalidState(format!("cannot encode state: {}", e)))?;
        let sealed = self
            .state_cipher
            .seal(&json)
            .map_err(|e| EngineError::InvalidState(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn verify_state(&self, state: &str, provider: Provider, now: DateTime<Utc>) -> EngineResult<String> {
        let sealed = URL_SAFE_NO_PAD
            .decode(state.trim())
            .map_err(|_| EngineError::InvalidState("state is not valid base64".into()))?;
        let json = self
            .state_cipher
            .open(&sealed)
            .map_err(|_| EngineError::InvalidState("state failed verification".into()))?;
        let payload: StatePayload = serde_json::from_slice(&json)
            .map_err(|e| EngineError::InvalidState(format!("unreadable state: {}", e)))?;

        if payload.exp <= now.timestamp() {
            return Err(EngineError::InvalidState("state has expired".into()));
        }
        if payload.provider != provider {
            return Err(EngineError::InvalidState(format!(
                "state was issued for {}, not {}",
                payload.provider, provider
            )));
        }
        if payload.sub.is_empty() {
            return Err(EngineError::InvalidState("state has no user".into()));
        }
        Ok(payload.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;
    use chrono::TimeZone;
    use crossdesk_providers::{
        BoxFuture, ProviderError, ProviderErrorCode, ProviderResult, TokenEndpoint, TokenGrant,
    };
    use std::sync::Arc;

    struct FakeEndpoint;

    impl TokenEndpoint for FakeEndpoint {
        fn authorize_url(&self, provider: Provider, state: &str) -> ProviderResult<String> {
            Ok(format!("https://consent.test/{provider}?state={state}"))
        }

        fn exchange_code<'a>(
            &'a self,
            _provider: Provider,
            code: &'a str,
        ) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
            Box::pin(async move {
                if code == "bad" {
                    return Err(ProviderError::new(
                        ProviderErrorCode::AuthenticationFailed,
                        "invalid_grant",
                    ));
                }
                Ok(TokenGrant {
                    access_token: format!("access-{code}"),
                    refresh_token: Some("refresh".into()),
                    expires_in: Some(3600),
                    scope: None,
                })
            })
        }

        fn refresh<'a>(
            &'a self,
            _provider: Provider,
            _refresh_token: &'a str,
        ) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
            Box::pin(async { Err(ProviderError::internal("unused")) })
        }

        fn scopes(&self, _provider: Provider) -> Vec<String> {
            vec!["mail".into()]
        }
    }

    fn flow() -> ConnectFlow {
        let vault = CredentialVault::new(
            Arc::new(MemoryCredentialStore::new()),
            TokenCipher::for_tokens("secret"),
            Arc::new(FakeEndpoint),
        );
        ConnectFlow::new(vault, "secret")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, 9, 0, 0).unwrap()
    }

    fn state_of(url: &str) -> String {
        url.split("state=").nth(1).unwrap().to_string()
    }

    #[tokio::test]
    async fn round_trip_stores_credential() {
        let flow = flow();
        let url = flow.authorize_url("user-1", Provider::Google, now()).unwrap();
        assert!(url.starts_with("https://consent.test/google?state="));
        let state = state_of(&url);
        assert!(!state.contains("user-1"));

        let connected = flow
            .complete(Provider::Google, "abc", &state, now() + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(connected.user_id, "user-1");
        assert_eq!(connected.credential.scopes, vec!["mail".to_string()]);

        let token = flow
            .vault
            .access_token("user-1", Provider::Google)
            .await
            .unwrap();
        assert_eq!(token, "access-abc");
    }

    #[tokio::test]
    async fn reconnect_replaces_credential() {
        let flow = flow();
        for code in ["first", "second"] {
            let state = state_of(&flow.authorize_url("u", Provider::Microsoft, now()).unwrap());
            flow.complete(Provider::Microsoft, code, &state, now())
                .await
                .unwrap();
        }
        let credentials = flow.vault.store().list("u").await.unwrap();
        assert_eq!(credentials.len(), 1);
        assert_eq!(
            flow.vault.access_token("u", Provider::Microsoft).await.unwrap(),
            "access-second"
        );
    }

    #[tokio::test]
    async fn rejects_expired_state() {
        let flow = flow().with_ttl(Duration::seconds(60));
        let state = state_of(&flow.authorize_url("u", Provider::Google, now()).unwrap());
        let err = flow
            .complete(Provider::Google, "abc", &state, now() + Duration::seconds(61))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn rejects_state_for_other_provider() {
        let flow = flow();
        let state = state_of(&flow.authorize_url("u", Provider::Google, now()).unwrap());
        let err = flow
            .complete(Provider::Microsoft, "abc", &state, now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn rejects_forged_state() {
        let flow = flow();
        let other = ConnectFlow::new(
            CredentialVault::new(
                Arc::new(MemoryCredentialStore::new()),
                TokenCipher::for_tokens("x"),
                Arc::new(FakeEndpoint),
            ),
            "another-secret",
        );
        let forged = state_of(&other.authorize_url("victim", Provider::Google, now()).unwrap());

        for state in [forged.as_str(), "not-base64!", "", "AAAA"] {
            let err = flow
                .complete(Provider::Google, "abc", state, now())
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidState(_)), "{state}");
        }
    }

    #[tokio::test]
    async fn failed_exchange_stores_nothing() {
        let flow = flow();
        let state = state_of(&flow.authorize_url("u", Provider::Google, now()).unwrap());
        let err = flow
            .complete(Provider::Google, "bad", &state, now())
            .await
            .unwrap_err();
        match err {
            EngineError::ProviderRequestFailed(e) => assert_eq!(e.provider(), Some(Provider::Google)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(flow.vault.store().list("u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn connects_against_token_endpoint() {
        use crossdesk_providers::{OAuthClient, OAuthClientConfig, OAuthClients};
        use serde_json::json;
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.live",
                "refresh_token": "1//refresh",
                "expires_in": 3599,
                "scope": "openid email"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = OAuthClientConfig::google("gid", "gsecret", "https://app/cb")
            .with_token_url(format!("{}/token", server.uri()));
        let clients = OAuthClients::new().with_client(OAuthClient::new(config, reqwest::Client::new()));
        let vault = CredentialVault::new(
            Arc::new(MemoryCredentialStore::new()),
            TokenCipher::for_tokens("secret"),
            Arc::new(clients),
        );
        let flow = ConnectFlow::new(vault, "secret");

        let url = flow.authorize_url("u", Provider::Google, now()).unwrap();
        assert!(url.contains("prompt=consent"));
        let state = state_of(&url).split('&').next().unwrap().to_string();

        let connected = flow
            .complete(Provider::Google, "the-code", &state, now())
            .await
            .unwrap();
        assert_eq!(connected.credential.scopes, vec!["openid", "email"]);
        assert!(connected.credential.expires_at.is_some());
        assert_ne!(connected.credential.access_token, "ya29.live");
        assert_eq!(
            flow.vault.access_token("u", Provider::Google).await.unwrap(),
            "ya29.live"
        );
    }

    #[test]
    fn from_config_requires_secret() {
        let vault = CredentialVault::new(
            Arc::new(MemoryCredentialStore::new()),
            TokenCipher::for_tokens("x"),
            Arc::new(FakeEndpoint),
        );
        let err = ConnectFlow::from_config(vault.clone(), &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let config = EngineConfig::default()
            .with_vault_secret("s")
            .with_state_ttl_secs(120);
        let flow = ConnectFlow::from_config(vault, &config).unwrap();
        assert_eq!(flow.ttl, Duration::seconds(120));
    }
}
