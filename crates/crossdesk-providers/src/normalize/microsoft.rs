use chrono::NaiveDate;
use crossdesk_core::{
    Attendee, CanonicalEvent, CanonicalMessage, EventStatus, Provider, ResponseStatus,
    normalize_date, normalize_timestamp, normalize_timestamp_in_zone,
};

use super::links::find_meeting_link;
use super::non_empty;
use crate::microsoft::wire::{DateTimeTimeZone, EmailAddress, GraphEvent, GraphMessage};

/// Maps Graph's response vocabulary onto the canonical set.
///
/// Organizers count as accepted. Anything unrecognised, including `none`
/// and `notResponded`, is `needsAction`.
pub fn map_response(response: &str) -> ResponseStatus {
    match response {
        "organizer" | "accepted" => ResponseStatus::Accepted,
        "tentativelyAccepted" => ResponseStatus::Tentative,
        "declined" => ResponseStatus::Declined,
        _ => ResponseStatus::NeedsAction,
    }
}

fn display_address(email: Option<&EmailAddress>) -> String {
    let Some(email) = email else {
        return String::new();
    };
    let address = email.address.as_deref().unwrap_or_default();
    match non_empty(email.name.as_deref()) {
        Some(name) if !address.is_empty() => format!("{name} <{address}>"),
        Some(name) => name.to_string(),
        None => address.to_string(),
    }
}

pub(super) fn parse_message(message: &GraphMessage) -> Option<CanonicalMessage> {
    let id = non_empty(message.id.as_deref())?;

    let received = message.received_date_time.as_deref().unwrap_or_default();
    let mut parsed = CanonicalMessage::new(id, Provider::Microsoft)
        .with_date(normalize_timestamp(received).unwrap_or_else(|| received.to_string()))
        .with_unread(!message.is_read.unwrap_or(true));

    if let Some(subject) = non_empty(message.subject.as_deref()) {
        parsed = parsed.with_subject(subject);
    }
    parsed.thread_id = message.conversation_id.clone().unwrap_or_default();
    parsed.from = display_address(message.from.as_ref().and_then(|r| r.email_address.as_ref()));
    parsed.to = message
        .to_recipients
        .iter()
        .filter_map(|r| r.email_address.as_ref()?.address.clone())
        .collect::<Vec<_>>()
        .join(", ");
    parsed.snippet = message.body_preview.clone().unwrap_or_default();
    parsed.body = message
        .body
        .as_ref()
        .and_then(|b| b.content.clone())
        .unwrap_or_default();
    parsed.is_starred = message
        .flag
        .as_ref()
        .and_then(|f| f.flag_status.as_deref())
        == Some("flagged");

    Some(parsed)
}

/// All-day values keep their date at midnight UTC; timed values resolve
/// their naive time in the accompanying zone.
fn event_time(time: Option<&DateTimeTimeZone>, all_day: bool) -> String {
    let Some(raw) = time.and_then(|t| non_empty(t.date_time.as_deref())) else {
        return String::new();
    };
    let raw = raw.trim();

    if all_day {
        let date = raw.get(..10).unwrap_or(raw);
        if let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            return normalize_date(date);
        }
    }

    let zone = time.and_then(|t| t.time_zone.as_deref());
    normalize_timestamp_in_zone(raw, zone).unwrap_or_else(|| raw.to_string())
}

pub(super) fn parse_event(event: &GraphEvent) -> Option<CanonicalEvent> {
    let id = non_empty(event.id.as_deref())?;
    let all_day = event.is_all_day.unwrap_or(false);
    let my_response = event
        .response_status
        .as_ref()
        .and_then(|r| r.response.as_deref())
        .unwrap_or("none");

    let mut parsed = CanonicalEvent::new(
        id,
        Provider::Microsoft,
        event_time(event.start.as_ref(), all_day),
        event_time(event.end.as_ref(), all_day),
    )
    .with_all_day(all_day)
    .with_my_response(map_response(my_response));

    if let Some(title) = non_empty(event.subject.as_deref()) {
        parsed = parsed.with_title(title);
    }
    parsed.description = event
        .body
        .as_ref()
        .and_then(|b| b.content.clone())
        .unwrap_or_default();
    parsed.location = event
        .location
        .as_ref()
        .and_then(|l| l.display_name.clone())
        .unwrap_or_default();
    parsed.timezone = event
        .start
        .as_ref()
        .and_then(|s| non_empty(s.time_zone.as_deref()))
        .unwrap_or("UTC")
        .to_string();
    if event.is_cancelled.unwrap_or(false) {
        parsed.status = EventStatus::Cancelled;
    }

    let organizer = event.organizer.as_ref().and_then(|o| o.email_address.as_ref());
    parsed.organizer_email = organizer
        .and_then(|o| o.address.clone())
        .unwrap_or_default();
    parsed.organizer_name = organizer
        .and_then(|o| non_empty(o.name.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| parsed.organizer_email.clone());
    parsed.is_organizer = my_response == "organizer";

    parsed.attendees = event
        .attendees
        .iter()
        .map(|a| Attendee {
            email: a
                .email_address
                .as_ref()
                .and_then(|e| e.address.clone())
                .unwrap_or_default(),
            name: a
                .email_address
                .as_ref()
                .and_then(|e| e.name.clone())
                .unwrap_or_default(),
            response: map_response(
                a.status
                    .as_ref()
                    .and_then(|s| s.response.as_deref())
                    .unwrap_or("none"),
            ),
            is_self: false,
        })
        .collect();

    parsed.html_link = event.web_link.clone().unwrap_or_default();
    parsed.meeting_link = event
        .online_meeting
        .as_ref()
        .and_then(|m| m.join_url.clone())
        .or_else(|| find_meeting_link([parsed.location.as_str(), parsed.description.as_str()]))
        .unwrap_or_default();

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> GraphMessage {
        serde_json::from_value(json).unwrap()
    }

    fn event(json: serde_json::Value) -> GraphEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn response_map_is_total() {
        assert_eq!(map_response("organizer"), ResponseStatus::Accepted);
        assert_eq!(map_response("accepted"), ResponseStatus::Accepted);
        assert_eq!(map_response("tentativelyAccepted"), ResponseStatus::Tentative);
        assert_eq!(map_response("declined"), ResponseStatus::Declined);
        for other in ["none", "notResponded", "", "Accepted", "whatever"] {
            assert_eq!(map_response(other), ResponseStatus::NeedsAction, "{other}");
        }
    }

    #[test]
    fn message_fields() {
        let parsed = parse_message(&message(serde_json::json!({
            "id": "AAMk1",
            "conversationId": "conv-1",
            "subject": "",
            "bodyPreview": "Preview",
            "body": {"contentType": "html", "content": "<p>Hello</p>"},
            "from": {"emailAddress": {"name": "Bob", "address": "bob@example.com"}},
            "toRecipients": [
                {"emailAddress": {"address": "a@example.com"}},
                {"emailAddress": {"address": "b@example.com"}}
            ],
            "receivedDateTime": "2024-03-15T17:00:00Z",
            "isRead": false,
            "flag": {"flagStatus": "flagged"}
        })))
        .unwrap();

        assert_eq!(parsed.subject, "(no subject)");
        assert_eq!(parsed.from, "Bob <bob@example.com>");
        assert_eq!(parsed.to, "a@example.com, b@example.com");
        assert_eq!(parsed.date, "2024-03-15T17:00:00+00:00");
        assert_eq!(parsed.thread_id, "conv-1");
        assert_eq!(parsed.body, "<p>Hello</p>");
        assert!(parsed.is_unread);
        assert!(parsed.is_starred);
        assert!(parsed.labels.is_empty());
    }

    #[test]
    fn missing_read_flag_is_read() {
        let parsed = parse_message(&message(serde_json::json!({"id": "AAMk2"}))).unwrap();
        assert!(!parsed.is_unread);
        assert_eq!(parsed.from, "");
        assert_eq!(parsed.date, "");
    }

    #[test]
    fn timed_event_in_named_zone() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "ev1",
            "subject": "Sync",
            "start": {"dateTime": "2024-03-15T10:00:00.0000000", "timeZone": "America/New_York"},
            "end": {"dateTime": "2024-03-15T10:30:00.0000000", "timeZone": "America/New_York"},
            "responseStatus": {"response": "tentativelyAccepted"},
            "organizer": {"emailAddress": {"address": "lead@example.com"}},
            "attendees": [{
                "emailAddress": {"name": "Ann", "address": "ann@example.com"},
                "status": {"response": "declined"},
                "type": "required"
            }],
            "onlineMeeting": {"joinUrl": "https://teams.microsoft.com/l/meetup-join/1"}
        })))
        .unwrap();

        assert_eq!(parsed.start, "2024-03-15T14:00:00+00:00");
        assert_eq!(parsed.end, "2024-03-15T14:30:00+00:00");
        assert_eq!(parsed.timezone, "America/New_York");
        assert_eq!(parsed.my_response, ResponseStatus::Tentative);
        assert!(!parsed.is_organizer);
        assert_eq!(parsed.organizer_name, "lead@example.com");
        assert_eq!(parsed.attendees[0].response, ResponseStatus::Declined);
        assert_eq!(
            parsed.meeting_link,
            "https://teams.microsoft.com/l/meetup-join/1"
        );
    }

    #[test]
    fn utc_event_and_organizer() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "ev2",
            "start": {"dateTime": "2024-03-15T10:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2024-03-15T11:00:00.0000000", "timeZone": "UTC"},
            "responseStatus": {"response": "organizer"},
            "isCancelled": true
        })))
        .unwrap();

        assert_eq!(parsed.start, "2024-03-15T10:00:00+00:00");
        assert_eq!(parsed.title, "(No title)");
        assert!(parsed.is_organizer);
        assert_eq!(parsed.my_response, ResponseStatus::Accepted);
        assert!(parsed.is_cancelled());
    }

    #[test]
    fn all_day_event_uses_date() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "ev3",
            "isAllDay": true,
            "start": {"dateTime": "2024-03-15T00:00:00.0000000", "timeZone": "Pacific Standard Time"},
            "end": {"dateTime": "2024-03-16T00:00:00.0000000", "timeZone": "Pacific Standard Time"}
        })))
        .unwrap();

        assert!(parsed.is_all_day);
        assert_eq!(parsed.start, "2024-03-15T00:00:00+00:00");
        assert_eq!(parsed.end, "2024-03-16T00:00:00+00:00");
        assert_eq!(parsed.my_response, ResponseStatus::NeedsAction);
    }

    #[test]
    fn unknown_zone_reads_as_utc() {
        let parsed = parse_event(&event(serde_json::json!({
            "id": "ev4",
            "start": {"dateTime": "2024-03-15T10:00:00", "timeZone": "Mars/Olympus"}
        })))
        .unwrap();
        assert_eq!(parsed.start, "2024-03-15T10:00:00+00:00");
        assert_eq!(parsed.end, "");
    }
}
