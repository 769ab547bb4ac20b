//! Canonical calendar event types.
//!
//! - [`CanonicalEvent`]: a provider-agnostic calendar item
//! - [`Attendee`]: one invitee of an event
//! - [`ResponseStatus`]: the fixed response vocabulary shared by both providers
//! - [`EventStatus`]: confirmed or cancelled

use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// An attendee's response to an invitation.
///
/// Both providers map their native vocabularies onto these four values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    Accepted,
    Declined,
    Tentative,
    #[default]
    NeedsAction,
}

impl ResponseStatus {
    /// Returns the canonical wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Tentative => "tentative",
            Self::NeedsAction => "needsAction",
        }
    }

    /// Parses a canonical value. Anything unrecognized is `NeedsAction`.
    pub fn from_canonical(value: &str) -> Self {
        match value {
            "accepted" => Self::Accepted,
            "declined" => Self::Declined,
            "tentative" => Self::Tentative,
            _ => Self::NeedsAction,
        }
    }

    /// Returns true for responses a user can send (`needsAction` is not one).
    pub fn is_reply(&self) -> bool {
        !matches!(self, Self::NeedsAction)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the event is still happening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Cancelled,
}

/// An invitee of a calendar event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub name: String,
    pub response: ResponseStatus,
    pub is_self: bool,
}

/// A provider-agnostic calendar event.
///
/// `start` and `end` are ISO-8601 strings normalized to UTC with an explicit
/// `+00:00` offset, so plain string comparison orders them chronologically.
/// All-day events start at midnight UTC of their date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,
    pub provider: Provider,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start: String,
    pub end: String,
    /// The timezone the provider reported for the start time.
    pub timezone: String,
    pub is_all_day: bool,
    pub status: EventStatus,
    pub organizer_name: String,
    pub organizer_email: String,
    pub is_organizer: bool,
    pub my_response: ResponseStatus,
    pub attendees: Vec<Attendee>,
    pub html_link: String,
    pub meeting_link: String,
}

impl CanonicalEvent {
    /// Creates an event with the identifying fields set and everything else empty.
    pub fn new(
        id: impl Into<String>,
        provider: Provider,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            title: "(No title)".to_string(),
            description: String::new(),
            location: String::new(),
            start: start.into(),
            end: end.into(),
            timezone: "UTC".to_string(),
            is_all_day: false,
            status: EventStatus::Confirmed,
            organizer_name: String::new(),
            organizer_email: String::new(),
            is_organizer: false,
            my_response: ResponseStatus::NeedsAction,
            attendees: Vec::new(),
            html_link: String::new(),
            meeting_link: String::new(),
        }
    }

    /// Builder method to set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Builder method to mark as all-day.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.is_all_day = all_day;
        self
    }

    /// Builder method to set my response.
    pub fn with_my_response(mut self, response: ResponseStatus) -> Self {
        self.my_response = response;
        self
    }

    /// Builder method to add an attendee.
    pub fn with_attendee(mut self, attendee: Attendee) -> Self {
        self.attendees.push(attendee);
        self
    }

    /// Returns true if the event was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// Returns true if both start and end are present.
    pub fn has_time_range(&self) -> bool {
        !self.start.is_empty() && !self.end.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_wire_values() {
        assert_eq!(
            serde_json::to_string(&ResponseStatus::NeedsAction).unwrap(),
            "\"needsAction\""
        );
        assert_eq!(ResponseStatus::Tentative.as_str(), "tentative");
        assert_eq!(
            ResponseStatus::from_canonical("declined"),
            ResponseStatus::Declined
        );
        assert_eq!(
            ResponseStatus::from_canonical("maybe"),
            ResponseStatus::NeedsAction
        );
        assert!(!ResponseStatus::NeedsAction.is_reply());
    }

    #[test]
    fn event_builder_defaults() {
        let event = CanonicalEvent::new(
            "evt-1",
            Provider::Google,
            "2025-02-05T10:00:00+00:00",
            "2025-02-05T11:00:00+00:00",
        )
        .with_title("Standup");

        assert_eq!(event.title, "Standup");
        assert_eq!(event.status, EventStatus::Confirmed);
        assert!(event.has_time_range());
        assert!(!event.is_cancelled());
        assert_eq!(event.my_response, ResponseStatus::NeedsAction);
    }

    #[test]
    fn event_json_shape() {
        let event = CanonicalEvent::new("e", Provider::Microsoft, "a", "b");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["provider"], "microsoft");
        assert_eq!(value["status"], "confirmed");
        assert_eq!(value["my_response"], "needsAction");
        assert!(value["attendees"].is_array());
    }
}
