//! Engine configuration.
//!
//! All settings live in one `config.toml`, by default at
//! `~/.config/crossdesk/config.toml`. Credential values (`client_id`,
//! `client_secret`, `vault.secret`) support secret references:
//! - `pass::path/in/store` resolved via `pass show`
//! - `env::VAR_NAME` resolved from the environment
//! - plain text used as-is

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossdesk_core::{Provider, TracingConfig, TracingOutputFormat, init_tracing};
use crossdesk_providers::{OAuthClient, OAuthClientConfig, OAuthClients};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::secret;

/// Configuration for the crossdesk engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Google OAuth client registration.
    pub google: Option<ProviderSettings>,

    /// Microsoft OAuth client registration.
    pub microsoft: Option<ProviderSettings>,

    pub vault: VaultSettings,

    pub aggregate: AggregateSettings,

    pub oauth: OAuthSettings,

    pub text: TextSettings,

    pub logging: LoggingSettings,
}

/// OAuth client registration for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,

    /// Callback URL registered with the provider.
    pub redirect_uri: Option<String>,

    /// Microsoft tenant; ignored for Google.
    pub tenant: Option<String>,
}

/// Credential vault settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Process-wide secret the token encryption key is derived from.
    pub secret: Option<String>,

    /// Path of the JSON credential store.
    pub credentials_path: Option<PathBuf>,

    /// Seconds subtracted from a token's lifetime when storing its expiry.
    pub refresh_skew_secs: i64,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            secret: None,
            credentials_path: None,
            refresh_skew_secs: 60,
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateSettings {
    /// Items requested from each provider.
    pub page_size: u32,

    /// Upper bound on one provider branch, in seconds.
    pub provider_timeout_secs: u64,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            page_size: 25,
            provider_timeout_secs: 30,
        }
    }
}

/// OAuth connect flow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    /// Lifetime of a consent `state`, in seconds.
    pub state_ttl_secs: i64,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            state_ttl_secs: 600,
        }
    }
}

/// Text-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSettings {
    /// Upper bound on concurrent text-service calls during a scan.
    pub max_concurrency: usize,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self { max_concurrency: 5 }
    }
}

/// Log output settings, applied by [`EngineConfig::init_logging`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level for the crossdesk crates: `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,

    pub format: TracingOutputFormat,

    /// Include file and line of each event.
    pub include_location: bool,

    /// Full filter directive, e.g. `crossdesk_engine=debug,reqwest=info`.
    pub filter: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: TracingOutputFormat::Pretty,
            include_location: false,
            filter: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the default path, or defaults when absent.
    pub fn load() -> EngineResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!("no config file at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path and resolves secret references.
    pub fn load_from(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("failed to read config: {}", e)))?;
        Self::from_toml(&content)?.resolve_secrets()
    }

    /// Parses TOML without resolving secret references.
    pub fn from_toml(content: &str) -> EngineResult<Self> {
        toml::from_str(content)
            .map_err(|e| EngineError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crossdesk")
            .join("config.toml")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crossdesk")
    }

    /// Expands every `pass::`/`env::` reference in place.
    pub fn resolve_secrets(mut self) -> EngineResult<Self> {
        for settings in [self.google.as_mut(), self.microsoft.as_mut()]
            .into_iter()
            .flatten()
        {
            settings.client_id = secret::resolve_opt(settings.client_id.as_deref())?;
            settings.client_secret = secret::resolve_opt(settings.client_secret.as_deref())?;
        }
        self.vault.secret = secret::resolve_opt(self.vault.secret.as_deref())?;
        Ok(self)
    }

    /// Checks the settings that have no usable default.
    pub fn validate(&self) -> EngineResult<()> {
        if self.vault.secret.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(EngineError::config("vault.secret is required"));
        }
        if self.aggregate.page_size == 0 {
            return Err(EngineError::config("aggregate.page_size must be positive"));
        }
        if self.aggregate.provider_timeout_secs == 0 {
            return Err(EngineError::config(
                "aggregate.provider_timeout_secs must be positive",
            ));
        }
        if self.oauth.state_ttl_secs <= 0 {
            return Err(EngineError::config("oauth.state_ttl_secs must be positive"));
        }
        if self.text.max_concurrency == 0 {
            return Err(EngineError::config("text.max_concurrency must be positive"));
        }
        if self.vault.refresh_skew_secs < 0 {
            return Err(EngineError::config("vault.refresh_skew_secs cannot be negative"));
        }
        self.tracing_config()?;
        Ok(())
    }

    /// The subscriber settings described by `[logging]`.
    pub fn tracing_config(&self) -> EngineResult<TracingConfig> {
        let level = self.logging.level.trim().parse().map_err(|_| {
            EngineError::config(format!("unknown logging.level: {}", self.logging.level))
        })?;
        let mut settings = TracingConfig::default()
            .with_level(level)
            .with_format(self.logging.format);
        settings.include_location = self.logging.include_location;
        if let Some(filter) = &self.logging.filter {
            settings = settings.with_filter(filter.clone());
        }
        Ok(settings)
    }

    /// Installs the process-wide log subscriber from `[logging]`.
    ///
    /// Hosts call this once at startup, before building the vault.
    pub fn init_logging(&self) -> EngineResult<()> {
        init_tracing(self.tracing_config()?).map_err(|e| EngineError::config(e.to_string()))?;
        debug!(level = %self.logging.level, format = ?self.logging.format, "logging initialized");
        Ok(())
    }

    pub fn provider_settings(&self, provider: Provider) -> Option<&ProviderSettings> {
        match provider {
            Provider::Google => self.google.as_ref(),
            Provider::Microsoft => self.microsoft.as_ref(),
        }
    }

    /// Builds the token endpoint clients for every configured provider.
    pub fn oauth_clients(&self, http: reqwest::Client) -> EngineResult<OAuthClients> {
        let mut clients = OAuthClients::new();
        for provider in Provider::ALL {
            let Some(settings) = self.provider_settings(provider) else {
                continue;
            };
            let field = |value: &Option<String>, name: &str| {
                value
                    .clone()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| EngineError::config(format!("{}.{} is required", provider, name)))
            };
            let client_id = field(&settings.client_id, "client_id")?;
            let client_secret = field(&settings.client_secret, "client_secret")?;
            let redirect_uri = field(&settings.redirect_uri, "redirect_uri")?;

            let config = match provider {
                Provider::Google => OAuthClientConfig::google(client_id, client_secret, redirect_uri),
                Provider::Microsoft => OAuthClientConfig::microsoft(
                    client_id,
                    client_secret,
                    redirect_uri,
                    settings.tenant.as_deref(),
                ),
            };
            clients = clients.with_client(OAuthClient::new(config, http.clone()));
        }
        Ok(clients)
    }

    /// The credential store path, falling back to the data directory.
    pub fn credentials_path(&self) -> PathBuf {
        self.vault
            .credentials_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("credentials.json"))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregate.provider_timeout_secs)
    }

    pub fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.vault.refresh_skew_secs)
    }

    pub fn state_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.oauth.state_ttl_secs)
    }

    /// Builder method to set the vault secret.
    pub fn with_vault_secret(mut self, secret: impl Into<String>) -> Self {
        self.vault.secret = Some(secret.into());
        self
    }

    /// Builder method to set the credential store path.
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.vault.credentials_path = Some(path.into());
        self
    }

    /// Builder method to set the per-provider page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.aggregate.page_size = page_size;
        self
    }

    /// Builder method to set the per-branch timeout.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.aggregate.provider_timeout_secs = timeout.as_secs();
        self
    }

    /// Builder method to set the OAuth state lifetime.
    pub fn with_state_ttl_secs(mut self, secs: i64) -> Self {
        self.oauth.state_ttl_secs = secs;
        self
    }

    /// Builder method to set the text-service concurrency cap.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.text.max_concurrency = max;
        self
    }
}
