//! Provider tags.
//!
//! Exactly two providers are modeled. The tag travels with every credential
//! and every canonical item so follow-up actions (reply, respond, delete) can
//! be routed back to the provider that produced the item.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A mail/calendar provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Gmail and Google Calendar.
    Google,
    /// Outlook mail and calendar through Microsoft Graph.
    Microsoft,
}

impl Provider {
    /// Every provider, in fan-out order.
    pub const ALL: [Provider; 2] = [Provider::Google, Provider::Microsoft];

    /// Returns the wire tag for this provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }

    /// Returns a human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Microsoft => "Microsoft",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not a known provider tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gmail" => Ok(Self::Google),
            "microsoft" | "outlook" => Ok(Self::Microsoft),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Which providers a user has connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedProviders {
    pub google: bool,
    pub microsoft: bool,
}

impl ConnectedProviders {
    /// Creates flags with both providers connected.
    pub fn both() -> Self {
        Self {
            google: true,
            microsoft: true,
        }
    }

    /// Returns true if the given provider is connected.
    pub fn is_connected(&self, provider: Provider) -> bool {
        match provider {
            Provider::Google => self.google,
            Provider::Microsoft => self.microsoft,
        }
    }

    /// Sets the flag for one provider.
    pub fn set(&mut self, provider: Provider, connected: bool) {
        match provider {
            Provider::Google => self.google = connected,
            Provider::Microsoft => self.microsoft = connected,
        }
    }

    /// Returns the providers to query, honoring an optional single-provider filter.
    pub fn eligible(&self, filter: Option<Provider>) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.is_connected(*p))
            .filter(|p| filter.is_none_or(|f| f == *p))
            .collect()
    }
}

impl FromIterator<Provider> for ConnectedProviders {
    fn from_iter<I: IntoIterator<Item = Provider>>(iter: I) -> Self {
        let mut flags = Self::default();
        for provider in iter {
            flags.set(provider, true);
        }
        flags
    }
}
