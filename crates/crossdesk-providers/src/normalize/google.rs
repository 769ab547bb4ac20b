use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, NaiveDate};
use crossdesk_core::{
    Attendee, CanonicalEvent, CanonicalMessage, EventStatus, Provider, ResponseStatus,
    canonical_timestamp, normalize_date, normalize_timestamp, normalize_timestamp_in_zone,
};

use super::links::find_meeting_link;
use super::non_empty;
use crate::google::wire::{CalendarEvent, EventDateTime, GmailMessage, GmailPart};

/// Gmail emits URL-safe base64 with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes a Gmail body `data` field to text, replacing invalid UTF-8.
pub fn decode_body_data(data: &str) -> Option<String> {
    BODY_ENGINE
        .decode(data.trim())
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn part_text(part: &GmailPart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_deref()?;
    decode_body_data(data).filter(|text| !text.is_empty())
}

/// Depth-first search below `root` for the first part of `mime_type` with data.
fn find_part_text(root: &GmailPart, mime_type: &str) -> Option<String> {
    root.parts.iter().find_map(|part| {
        let is_match = part
            .mime_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(mime_type));
        is_match
            .then(|| part_text(part))
            .flatten()
            .or_else(|| find_part_text(part, mime_type))
    })
}

/// Prefers `text/plain`, then the first `text/html`, then the payload's own body.
fn extract_body(payload: Option<&GmailPart>) -> String {
    let Some(payload) = payload else {
        return String::new();
    };
    find_part_text(payload, "text/plain")
        .or_else(|| find_part_text(payload, "text/html"))
        .or_else(|| part_text(payload))
        .unwrap_or_default()
}

/// The `Date` header when parseable, then `internalDate`, then the raw header.
fn message_date(message: &GmailMessage) -> String {
    let header = message.header("Date");
    if let Some(normalized) = header.and_then(normalize_timestamp) {
        return normalized;
    }

    let internal = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.trim().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);
    if let Some(dt) = internal {
        return canonical_timestamp(dt);
    }

    header.unwrap_or_default().to_string()
}

pub(super) fn parse_message(message: &GmailMessage) -> Option<CanonicalMessage> {
    let id = non_empty(message.id.as_deref())?;
    let labels = message.label_ids.clone();

    let mut parsed = CanonicalMessage::new(id, Provider::Google)
        .with_date(message_date(message))
        .with_unread(labels.iter().any(|l| l == "UNREAD"));

    if let Some(subject) = non_empty(message.header("Subject")) {
        parsed = parsed.with_subject(subject);
    }
    parsed.thread_id = message.thread_id.clone().unwrap_or_default();
    parsed.from = message.header("From").unwrap_or_default().to_string();
    parsed.to = message.header("To").unwrap_or_default().to_string();
    parsed.snippet = message.snippet.clone().unwrap_or_default();
    parsed.body = extract_body(message.payload.as_ref());
    parsed.is_starred = labels.iter().any(|l| l == "STARRED");
    parsed.labels = labels;

    Some(parsed)
}

/// Timed values carry an offset; all-day values are a bare date.
fn event_time(time: Option<&EventDateTime>) -> String {
    let Some(time) = time else {
        return String::new();
    };
    if let Some(date_time) = non_empty(time.date_time.as_deref()) {
        return normalize_timestamp_in_zone(date_time, time.time_zone.as_deref())
            .unwrap_or_else(|| date_time.to_string());
    }
    if let Some(date) = non_empty(time.date.as_deref()) {
        return NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map(normalize_date)
            .unwrap_or_else(|_| date.to_string());
    }
    String::new()
}

pub(super) fn parse_event(event: &CalendarEvent) -> Option<CanonicalEvent> {
    let id = non_empty(event.id.as_deref())?;
    let start = event.start.as_ref();

    let mut parsed = CanonicalEvent::new(
        id,
        Provider::Google,
        event_time(start),
        event_time(event.end.as_ref()),
    )
    .with_all_day(start.is_some_and(|s| s.date.is_some() && s.date_time.is_none()));

    if let Some(title) = non_empty(event.summary.as_deref()) {
        parsed = parsed.with_title(title);
    }
    parsed.description = event.description.clone().unwrap_or_default();
    parsed.location = event.location.clone().unwrap_or_default();
    parsed.timezone = start
        .and_then(|s| non_empty(s.time_zone.as_deref()))
        .unwrap_or("UTC")
        .to_string();
    if event.status.as_deref() == Some("cancelled") {
        parsed.status = EventStatus::Cancelled;
    }

    if let Some(organizer) = &event.organizer {
        parsed.organizer_email = organizer.email.clone().unwrap_or_default();
        parsed.organizer_name = non_empty(organizer.display_name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| parsed.organizer_email.clone());
        parsed.is_organizer = organizer.is_self == Some(true);
    }

    parsed.attendees = event
        .attendees
        .iter()
        .map(|a| Attendee {
            email: a.email.clone().unwrap_or_default(),
            name: a.display_name.clone().unwrap_or_default(),
            response: ResponseStatus::from_canonical(a.response_status.as_deref().unwrap_or("")),
            is_self: a.is_self == Some(true),
        })
        .collect();
    parsed.my_response = parsed
        .attendees
        .iter()
        .find(|a| a.is_self)
        .map(|a| a.response)
        .unwrap_or_default();

    parsed.html_link = event.html_link.clone().unwrap_or_default();
    parsed.meeting_link = non_empty(event.hangout_link.as_deref())
        .map(str::to_string)
        .or_else(|| {
            event.conference_data.as_ref().and_then(|cd| {
                cd.entry_points
                    .iter()
                    .find(|ep| ep.entry_point_type.as_deref() == Some("video"))
                    .and_then(|ep| ep.uri.clone())
            })
        })
        .or_else(|| find_meeting_link([parsed.location.as_str(), parsed.description.as_str()]))
        .unwrap_or_default();

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn message(json: serde_json::Value) -> GmailMessage {
        serde_json::from_value(json).unwrap()
    }

    fn event(json: serde_json::Value) -> CalendarEvent {
        serde_json::from_value(json).unwrap()
    }

    fn encoded(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn body_prefers_plain_text() {
        let msg = message(serde_json::json!({
            "id": "m1",
            "payload": {
                "mimeType": "multipart/alternative",
                "parts": [
                    {"mimeType": "text/html", "body": {"data": encoded("<p>html</p>")}},
                    {"mimeType": "text/plain", "body": {"data": encoded("plain")}}
                ]
            }
        }));
        assert_eq!(parse_message(&msg).unwrap().body, "plain");
    }

    #[test]
    fn body_falls_back_to_html_then_payload() {
        let html = message(serde_json::json!({
            "id": "m1",
            "payload": {
                "mimeType": "multipart/mixed",
                "parts": [{
                    "mimeType": "multipart/alternative",
                    "parts": [{"mimeType": "text/html", "body": {"data": encoded("<b>hi</b>")}}]
                }]
            }
        }));
        assert_eq!(parse_message(&html).unwrap().body, "<b>hi</b>");

        let single = message(serde_json::json!({
            "id": "m2",
            "payload": {"mimeType": "text/plain", "body": {"data": encoded("single part")}}
        }));
        assert_eq!(parse_message(&single).unwrap().body, "single part");
    }

    #[test]
    fn padded_and_unpadded_data() {
        assert_eq!(decode_body_data("aGk=").as_deref(), Some("hi"));
        assert_eq!(decode_body_data("aGk").as_deref(), Some("hi"));
    }

    #[test]
    fn message_headers_and_flags() {
        let msg = message(serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD", "STARRED"],
            "snippet": "Quick question",
            "payload": {"headers": [
                {"name": "From", "value": "Ann <ann@example.com>"},
                {"name": "To", "value": "me@example.com"},
                {"name": "Subject", "value": "Question"},
                {"name": "Date", "value": "Fri, 15 Mar 2024 10:00:00 -0700"}
            ]}
        }));
        let parsed = parse_message(&msg).unwrap();
        assert_eq!(parsed.from, "Ann <ann@example.com>");
        assert_eq!(parsed.subject, "Question");
        assert_eq!(parsed.date, "2024-03-15T17:00:00+00:00");
        assert!(parsed.is_unread);
        assert!(parsed.is_starred);
        assert_eq!(parsed.labels.len(), 3);
        assert_eq!(parsed.provider, Provider::Google);
    }

    #[test]
    fn date_falls_back_to_internal_date() {
        let msg = message(serde_json::json!({
            "id": "m1",
            "internalDate": "1710496800000",
            "payload": {"headers": [{"name": "Date", "value": "sometime last week"}]}
        }));
        assert_eq!(parse_message(&msg).unwrap().date, "2024-03-15T10:00:00+00:00");

        let raw_only = message(serde_json::json!({
            "id": "m2",
            "payload": {"headers": [{"name": "Date", "value": "sometime last week"}]}
        }));
        assert_eq!(parse_message(&raw_only).unwrap().date, "sometime last week");
    }

    #[test]
    fn timed_event() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "e1",
            "summary": "Standup",
            "start": {"dateTime": "2024-03-15T10:00:00-07:00", "timeZone": "America/Los_Angeles"},
            "end": {"dateTime": "2024-03-15T10:15:00-07:00"},
            "organizer": {"email": "lead@example.com"},
            "attendees": [
                {"email": "lead@example.com", "responseStatus": "accepted", "organizer": true},
                {"email": "me@example.com", "self": true, "responseStatus": "tentative"}
            ],
            "hangoutLink": "https://meet.google.com/abc-defg-hij"
        })))
        .unwrap();

        assert_eq!(parsed.start, "2024-03-15T17:00:00+00:00");
        assert_eq!(parsed.end, "2024-03-15T17:15:00+00:00");
        assert_eq!(parsed.timezone, "America/Los_Angeles");
        assert!(!parsed.is_all_day);
        assert_eq!(parsed.organizer_name, "lead@example.com");
        assert!(!parsed.is_organizer);
        assert_eq!(parsed.my_response, ResponseStatus::Tentative);
        assert_eq!(parsed.attendees.len(), 2);
        assert_eq!(parsed.meeting_link, "https://meet.google.com/abc-defg-hij");
    }

    #[test]
    fn all_day_event() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "e2",
            "start": {"date": "2024-03-15"},
            "end": {"date": "2024-03-16"},
            "status": "cancelled",
            "organizer": {"email": "me@example.com", "displayName": "Me", "self": true}
        })))
        .unwrap();

        assert!(parsed.is_all_day);
        assert_eq!(parsed.start, "2024-03-15T00:00:00+00:00");
        assert_eq!(parsed.end, "2024-03-16T00:00:00+00:00");
        assert_eq!(parsed.title, "(No title)");
        assert!(parsed.is_cancelled());
        assert!(parsed.is_organizer);
        assert_eq!(parsed.organizer_name, "Me");
        assert_eq!(parsed.my_response, ResponseStatus::NeedsAction);
    }

    #[test]
    fn conference_video_link() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "e3",
            "conferenceData": {"entryPoints": [
                {"entryPointType": "phone", "uri": "tel:+1-555"},
                {"entryPointType": "video", "uri": "https://zoom.us/j/1"}
            ]}
        })))
        .unwrap();
        assert_eq!(parsed.meeting_link, "https://zoom.us/j/1");
        assert_eq!(parsed.start, "");
    }

    #[test]
    fn meeting_link_from_description() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "e4",
            "location": "Room 2",
            "description": "Dial in via <a href=\"https://meet.jit.si/weekly-sync\">Jitsi</a>"
        })))
        .unwrap();
        assert_eq!(parsed.meeting_link, "https://meet.jit.si/weekly-sync");
    }

    #[test]
    fn unknown_response_is_needs_action() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "e4",
            "attendees": [{"email": "me@example.com", "self": true, "responseStatus": "maybe"}]
        })))
        .unwrap();
        assert_eq!(parsed.my_response, ResponseStatus::NeedsAction);
    }
}
