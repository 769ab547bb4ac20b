//! crossdesk-engine: credentials, aggregation and the connect flow.
//!
//! This crate ties the provider adapters to stored credentials:
//! - [`CredentialVault`] keeps encrypted tokens and refreshes them once per expiry
//! - [`Aggregator`] fans out across connected providers and merges the results
//! - [`ConnectFlow`] drives the OAuth authorize and callback steps
//! - [`text`] holds the text-service boundary and its consumers

pub mod aggregator;
pub mod config;
pub mod connect;
pub mod crypto;
pub mod error;
pub mod secret;
pub mod store;
pub mod text;
pub mod vault;

pub use aggregator::{
    Aggregator, Briefing, EventAggregate, EventRequest, MessageAggregate, MessageRequest,
};
pub use config::{
    AggregateSettings, EngineConfig, LoggingSettings, OAuthSettings, ProviderSettings, TextSettings,
    VaultSettings,
};
pub use connect::{ConnectFlow, Connected};
pub use crypto::{CipherError, TokenCipher};
pub use error::{EngineError, EngineResult};
pub use store::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use text::{
    EmailCategory, ScanReport, StreamEvent, TaskScanner, TaskSuggestion, TextRequest, TextService,
    TextStream, TitleSink, TranscriptSink,
};
pub use vault::CredentialVault;
