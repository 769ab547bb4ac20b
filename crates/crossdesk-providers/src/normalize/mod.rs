//! Mapping raw provider payloads into the canonical schema.
//!
//! Every function here is pure and total: missing fields take defaults and
//! unknown vocabulary maps to a fixed fallback. The only thing that drops an
//! item is a missing id.

mod google;
mod links;
mod microsoft;

use crossdesk_core::{CanonicalEvent, CanonicalMessage};
use tracing::warn;

use crate::raw::{RawEvent, RawMessage};

pub use google::decode_body_data;
pub use links::find_meeting_link;
pub use microsoft::map_response;

/// Normalizes one message, or `None` when the provider omitted its id.
pub fn normalize_message(raw: &RawMessage) -> Option<CanonicalMessage> {
    match raw {
        RawMessage::Google(m) => google::parse_message(m),
        RawMessage::Microsoft(m) => microsoft::parse_message(m),
    }
}

/// Normalizes one event, or `None` when the provider omitted its id.
pub fn normalize_event(raw: &RawEvent) -> Option<CanonicalEvent> {
    match raw {
        RawEvent::Google(e) => google::parse_event(e),
        RawEvent::Microsoft(e) => microsoft::parse_event(e),
    }
}

/// Normalizes a batch, dropping only items without an id.
pub fn normalize_messages(raw: &[RawMessage]) -> Vec<CanonicalMessage> {
    raw.iter()
        .filter_map(|m| {
            let parsed = normalize_message(m);
            if parsed.is_none() {
                warn!(provider = %m.provider(), "dropping message without id");
            }
            parsed
        })
        .collect()
}

/// Normalizes a batch, dropping only items without an id.
pub fn normalize_events(raw: &[RawEvent]) -> Vec<CanonicalEvent> {
    raw.iter()
        .filter_map(|e| {
            let parsed = normalize_event(e);
            if parsed.is_none() {
                warn!(provider = %e.provider(), "dropping event without id");
            }
            parsed
        })
        .collect()
}

/// Uses `value` when it is present and non-blank.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
