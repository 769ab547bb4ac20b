//! OAuth 2.0 authorization-code flow against the Google and Microsoft
//! token endpoints.
//!
//! Both providers use the confidential-client variant: the consent URL
//! carries an opaque `state`, the callback's `code` is exchanged with the
//! client secret, and refresh uses the stored refresh token. The providers
//! differ only in URLs, scopes and a few extra parameters.

use std::fmt;

use crossdesk_core::Provider;
use reqwest::Method;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::google::GOOGLE_SCOPES;
use crate::http;
use crate::microsoft::MICROSOFT_SCOPES;
use crate::provider::BoxFuture;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const MICROSOFT_LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// Tenant used when none is configured: any work, school or personal account.
pub const DEFAULT_TENANT: &str = "common";

/// Response from a token endpoint.
#[derive(Clone, serde::Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent on most Google refreshes; Microsoft rotates it on every refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Returns the granted scopes, or `requested` when the endpoint did not echo them.
    pub fn scopes_or(&self, requested: &[String]) -> Vec<String> {
        match &self.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => requested.to_vec(),
        }
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Client registration for one provider.
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub provider: Provider,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    /// Extra query parameters for the consent URL.
    pub authorize_params: Vec<(String, String)>,
    /// Whether token requests must repeat the scope list.
    pub send_scope: bool,
}

impl fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl OAuthClientConfig {
    /// Google registration; requests offline access and forces the consent
    /// screen so a refresh token is always issued.
    pub fn google(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            provider: Provider::Google,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            authorize_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: GOOGLE_SCOPES.iter().map(|s| s.to_string()).collect(),
            authorize_params: vec![
                ("access_type".into(), "offline".into()),
                ("prompt".into(), "consent".into()),
            ],
            send_scope: false,
        }
    }

    /// Microsoft identity platform registration for `tenant` (default `common`).
    pub fn microsoft(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        tenant: Option<&str>,
    ) -> Self {
        let tenant = tenant
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TENANT);
        Self {
            provider: Provider::Microsoft,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            authorize_url: format!("{}/{}/oauth2/v2.0/authorize", MICROSOFT_LOGIN_BASE, tenant),
            token_url: format!("{}/{}/oauth2/v2.0/token", MICROSOFT_LOGIN_BASE, tenant),
            scopes: MICROSOFT_SCOPES.iter().map(|s| s.to_string()).collect(),
            authorize_params: vec![("response_mode".into(), "query".into())],
            send_scope: true,
        }
    }

    /// Builder method to override the token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

/// Talks to one provider's authorization server.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthClientConfig,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: OAuthClientConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &OAuthClientConfig {
        &self.config
    }

    /// Builds the consent URL carrying `state`.
    pub fn authorize_url(&self, state: &str) -> String {
        let scope = self.config.scopes.join(" ");
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
        );
        for (key, value) in &self.config.authorize_params {
            url.push_str(&format!(
                "&{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            ));
        }
        url
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> ProviderResult<TokenGrant> {
        let grant = self
            .token_request(&[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;
        info!(provider = %self.config.provider, "obtained tokens from authorization code");
        Ok(grant)
    }

    /// Obtains a new access token from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> ProviderResult<TokenGrant> {
        let grant = self
            .token_request(&[
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        debug!(
            provider = %self.config.provider,
            rotated = grant.refresh_token.is_some(),
            "refreshed access token"
        );
        Ok(grant)
    }

    async fn token_request(&self, grant_params: &[(&str, &str)]) -> ProviderResult<TokenGrant> {
        let scope = self.config.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        params.extend_from_slice(grant_params);
        if self.config.send_scope {
            params.push(("scope", scope.as_str()));
        }

        let request = self
            .http
            .request(Method::POST, &self.config.token_url)
            .form(&params);

        http::send_json(self.config.provider, request)
            .await
            .map_err(grant_error)
    }
}

/// 400 and 401 from a token endpoint mean the grant itself was refused
/// (`invalid_grant`, revoked consent, wrong secret).
fn grant_error(err: ProviderError) -> ProviderError {
    match (err.code(), err.status()) {
        (ProviderErrorCode::BadRequest | ProviderErrorCode::AuthenticationFailed, Some(status)) => {
            let mut rejected = ProviderError::authentication(err.message()).with_status(status);
            if let Some(provider) = err.provider() {
                rejected = rejected.with_provider(provider);
            }
            rejected
        }
        _ => err,
    }
}

/// The token endpoint operations the engine needs, per provider.
pub trait TokenEndpoint: Send + Sync {
    fn authorize_url(&self, provider: Provider, state: &str) -> ProviderResult<String>;

    fn exchange_code<'a>(
        &'a self,
        provider: Provider,
        code: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenGrant>>;

    fn refresh<'a>(
        &'a self,
        provider: Provider,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenGrant>>;

    /// Scopes requested for `provider`.
    fn scopes(&self, provider: Provider) -> Vec<String>;
}

/// One [`OAuthClient`] per configured provider.
#[derive(Debug, Clone, Default)]
pub struct OAuthClients {
    google: Option<OAuthClient>,
    microsoft: Option<OAuthClient>,
}

impl OAuthClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to register a client under its provider.
    pub fn with_client(mut self, client: OAuthClient) -> Self {
        match client.config.provider {
            Provider::Google => self.google = Some(client),
            Provider::Microsoft => self.microsoft = Some(client),
        }
        self
    }

    pub fn client(&self, provider: Provider) -> ProviderResult<&OAuthClient> {
        let client = match provider {
            Provider::Google => self.google.as_ref(),
            Provider::Microsoft => self.microsoft.as_ref(),
        };
        client.ok_or_else(|| {
            ProviderError::configuration(format!("no OAuth client configured for {}", provider))
                .with_provider(provider)
        })
    }
}

impl TokenEndpoint for OAuthClients {
    fn authorize_url(&self, provider: Provider, state: &str) -> ProviderResult<String> {
        Ok(self.client(provider)?.authorize_url(state))
    }

    fn exchange_code<'a>(
        &'a self,
        provider: Provider,
        code: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(async move { self.client(provider)?.exchange_code(code).await })
    }

    fn refresh<'a>(
        &'a self,
        provider: Provider,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(async move { self.client(provider)?.refresh(refresh_token).await })
    }

    fn scopes(&self, provider: Provider) -> Vec<String> {
        self.client(provider)
            .map(|c| c.config.scopes.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn microsoft(server: &MockServer) -> OAuthClient {
        let config = OAuthClientConfig::microsoft("ms-client", "ms-secret", "https://app/cb", None)
            .with_token_url(format!("{}/token", server.uri()));
        OAuthClient::new(config, reqwest::Client::new())
    }

    #[test]
    fn google_authorize_url() {
        let client = OAuthClient::new(
            OAuthClientConfig::google("gid.apps.googleusercontent.com", "secret", "https://app/cb"),
            reqwest::Client::new(),
        );
        let url = client.authorize_url("opaque-state");

        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("state=opaque-state"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp%2Fcb"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("gmail.modify"));
    }

    #[test]
    fn microsoft_tenant_defaults_to_common() {
        let config = OAuthClientConfig::microsoft("id", "secret", "https://app/cb", Some(" "));
        assert_eq!(
            config.authorize_url,
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
        );
        assert!(config.scopes.iter().any(|s| s == "offline_access"));

        let config = OAuthClientConfig::microsoft("id", "secret", "https://app/cb", Some("contoso"));
        assert!(config.token_url.contains("/contoso/"));
    }

    #[test]
    fn grant_debug_is_redacted() {
        let grant = TokenGrant {
            access_token: "ya29.secret".into(),
            refresh_token: Some("1//refresh".into()),
            expires_in: Some(3600),
            scope: None,
        };
        let debug = format!("{:?}", grant);
        assert!(!debug.contains("ya29"));
        assert!(!debug.contains("1//refresh"));
    }

    #[test]
    fn granted_scopes() {
        let grant = TokenGrant {
            access_token: "a".into(),
            refresh_token: None,
            expires_in: None,
            scope: Some("Mail.Read User.Read".into()),
        };
        assert_eq!(grant.scopes_or(&[]), vec!["Mail.Read", "User.Read"]);
    }

    #[tokio::test]
    async fn refresh_sends_scope_for_microsoft() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .and(body_string_contains("offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = microsoft(&server).refresh("old-refresh").await.unwrap();
        assert_eq!(grant.access_token, "new-access");
        assert_eq!(grant.refresh_token.as_deref(), Some("new-refresh"));
        assert_eq!(grant.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn invalid_grant_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70008: The refresh token has expired."
            })))
            .mount(&server)
            .await;

        let err = microsoft(&server).refresh("stale").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::AuthenticationFailed);
        assert_eq!(err.status(), Some(400));
        assert!(err.message().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn server_error_stays_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = microsoft(&server).refresh("r").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unconfigured_provider() {
        let clients = OAuthClients::new();
        let err = clients.refresh(Provider::Google, "r").await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::ConfigurationError);
        assert!(clients.scopes(Provider::Google).is_empty());
    }
}
