//! Uninterpreted provider payloads.
//!
//! Adapters return these without interpretation. The tag on each variant
//! decides which normalizer reads it.

use crossdesk_core::Provider;

use crate::google::wire::{CalendarEvent, GmailMessage};
use crate::microsoft::wire::{GraphEvent, GraphMessage};

/// A mail item as the provider returned it.
#[derive(Debug, Clone)]
pub enum RawMessage {
    Google(GmailMessage),
    Microsoft(GraphMessage),
}

impl RawMessage {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Google(_) => Provider::Google,
            Self::Microsoft(_) => Provider::Microsoft,
        }
    }

    /// The provider's id for this item, if present.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Google(m) => m.id.as_deref(),
            Self::Microsoft(m) => m.id.as_deref(),
        }
    }
}

/// A calendar item as the provider returned it.
#[derive(Debug, Clone)]
pub enum RawEvent {
    Google(CalendarEvent),
    Microsoft(GraphEvent),
}

impl RawEvent {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Google(_) => Provider::Google,
            Self::Microsoft(_) => Provider::Microsoft,
        }
    }

    /// The provider's id for this item, if present.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Google(e) => e.id.as_deref(),
            Self::Microsoft(e) => e.id.as_deref(),
        }
    }
}

/// One page of a message listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<RawMessage>,
    /// Opaque token for the next page, if the provider reported more.
    pub next_page_token: Option<String>,
}

/// One page of an event listing.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    pub next_page_token: Option<String>,
}

/// What a provider reports after accepting an outgoing message.
///
/// Graph answers `202 Accepted` with no body, so both ids may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider: Provider,
    pub id: Option<String>,
    pub thread_id: Option<String>,
}

impl SendReceipt {
    pub fn accepted(provider: Provider) -> Self {
        Self {
            provider,
            id: None,
            thread_id: None,
        }
    }
}
