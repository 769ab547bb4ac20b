//! MailCalendarProvider trait, Google and Microsoft adapters, OAuth endpoints.
//!
//! This crate is the layer between the engine and the two vendor APIs:
//!
//! - [`MailCalendarProvider`] - The trait both adapters implement
//! - [`RawMessage`] / [`RawEvent`] - Raw payloads tagged with their provider
//! - [`normalize_message`] / [`normalize_event`] - Mapping into the canonical schema
//! - [`TokenEndpoint`] - Authorization URLs, code exchange and refresh
//! - [`ProviderError`] - Error types for provider operations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐    ┌──────────────────────┐
//! │ Gmail + Calendar API │    │   Microsoft Graph    │
//! └──────────┬───────────┘    └──────────┬───────────┘
//!            │                           │
//!            ▼                           ▼
//! ┌──────────────────────┐    ┌──────────────────────┐
//! │    GoogleAdapter     │    │   MicrosoftAdapter   │
//! └──────────┬───────────┘    └──────────┬───────────┘
//!            │                           │
//!            │    MailCalendarProvider   │
//!            └─────────────┬─────────────┘
//!                          │
//!                          ▼
//!               ┌─────────────────────┐
//!               │ RawMessage/RawEvent │
//!               └──────────┬──────────┘
//!                          │
//!                          ▼ normalize_*()
//!           ┌──────────────────────────────────┐
//!           │ CanonicalMessage / CanonicalEvent │
//!           └──────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use crossdesk_providers::{AdapterFactory, HttpAdapters, MessageQuery, normalize_messages};
//!
//! let adapters = HttpAdapters::new(DEFAULT_TIMEOUT)?;
//! let gmail = adapters.adapter(Provider::Google, &access_token);
//! let page = gmail.list_messages(MessageQuery::new(20)).await?;
//! let inbox = normalize_messages(&page.messages);
//! ```

pub mod error;
pub mod google;
mod http;
pub mod microsoft;
pub mod normalize;
pub mod oauth;
pub mod provider;
pub mod raw;

// Re-export main types at crate root
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use google::GoogleAdapter;
pub use microsoft::MicrosoftAdapter;
pub use normalize::{normalize_event, normalize_events, normalize_message, normalize_messages};
pub use oauth::{OAuthClient, OAuthClientConfig, OAuthClients, TokenEndpoint, TokenGrant};
pub use provider::{
    AdapterFactory, ApiEndpoints, BoxFuture, DEFAULT_TIMEOUT, EventPatch, EventQuery,
    HttpAdapters, MailCalendarProvider, MessageQuery, NewEvent, OutgoingMessage,
};
pub use raw::{EventPage, MessagePage, RawEvent, RawMessage, SendReceipt};
