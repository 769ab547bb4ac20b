//! Engine error types.

use crossdesk_core::Provider;
use crossdesk_providers::{ProviderError, ProviderErrorCode};
use thiserror::Error;

/// Errors surfaced by the vault, aggregator and connect flow.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No credential is stored for this user and provider.
    #[error("{provider} is not connected")]
    CredentialMissing { provider: Provider },

    /// The stored credential cannot be used (decryption failed, token malformed).
    #[error("{provider} credential is invalid: {reason}")]
    CredentialInvalid { provider: Provider, reason: String },

    /// The token endpoint refused the refresh; the user must reconnect.
    #[error("{provider} refused the token refresh: {message}")]
    RefreshRejected { provider: Provider, message: String },

    /// The refresh could not complete for a transient reason.
    #[error("{provider} token refresh failed: {message}")]
    RefreshFailed { provider: Provider, message: String },

    #[error(transparent)]
    ProviderRequestFailed(#[from] ProviderError),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The OAuth `state` parameter was forged, expired or for another provider.
    #[error("invalid OAuth state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn credential_invalid(provider: Provider, reason: impl Into<String>) -> Self {
        Self::CredentialInvalid {
            provider,
            reason: reason.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classifies a token endpoint failure.
    ///
    /// Authentication failures mean the grant itself was refused; everything
    /// else is worth retrying on a later request.
    pub fn from_refresh(provider: Provider, err: ProviderError) -> Self {
        match err.code() {
            ProviderErrorCode::AuthenticationFailed | ProviderErrorCode::AuthorizationFailed => {
                Self::RefreshRejected {
                    provider,
                    message: err.message().to_string(),
                }
            }
            _ => Self::RefreshFailed {
                provider,
                message: err.message().to_string(),
            },
        }
    }

    /// True when only a fresh consent can fix the credential.
    pub fn needs_reauthorization(&self) -> bool {
        matches!(self, Self::RefreshRejected { .. })
    }

    /// The provider this error is attributed to, if any.
    pub fn provider(&self) -> Option<Provider> {
        match self {
            Self::CredentialMissing { provider }
            | Self::CredentialInvalid { provider, .. }
            | Self::RefreshRejected { provider, .. }
            | Self::RefreshFailed { provider, .. } => Some(*provider),
            Self::ProviderRequestFailed(err) => err.provider(),
            _ => None,
        }
    }

    /// The message without the provider prefix, for aggregate error lists.
    pub fn detail(&self) -> String {
        match self {
            Self::CredentialMissing { .. } => "not connected".to_string(),
            Self::CredentialInvalid { reason, .. } => format!("invalid credential: {}", reason),
            Self::RefreshRejected { message, .. } => {
                format!("re-authorization required: {}", message)
            }
            Self::RefreshFailed { message, .. } => format!("token refresh failed: {}", message),
            Self::ProviderRequestFailed(err) => err.message().to_string(),
            other => other.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_classification() {
        let rejected = EngineError::from_refresh(
            Provider::Google,
            ProviderError::authentication("invalid_grant").with_status(400),
        );
        assert!(rejected.needs_reauthorization());
        assert_eq!(rejected.provider(), Some(Provider::Google));

        let transient = EngineError::from_refresh(
            Provider::Microsoft,
            ProviderError::server("API error (503): unavailable").with_status(503),
        );
        assert!(!transient.needs_reauthorization());
        assert!(matches!(transient, EngineError::RefreshFailed { .. }));
    }

    #[test]
    fn provider_errors_convert() {
        let err: EngineError = ProviderError::not_found("gone")
            .with_provider(Provider::Microsoft)
            .into();
        assert_eq!(err.provider(), Some(Provider::Microsoft));
        assert_eq!(err.detail(), "gone");
    }

    #[test]
    fn display_names_provider() {
        let err = EngineError::CredentialMissing {
            provider: Provider::Google,
        };
        assert_eq!(err.to_string(), "google is not connected");
        assert_eq!(err.detail(), "not connected");
    }
}
