//! Microsoft Graph mail and calendar JSON shapes.

use serde::{Deserialize, Serialize};

/// A Graph collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphList<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    pub subject: Option<String>,
    pub body_preview: Option<String>,
    pub body: Option<ItemBody>,
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    pub received_date_time: Option<String>,
    pub is_read: Option<bool>,
    pub flag: Option<FollowupFlag>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub content_type: Option<String>,
    pub content: Option<String>,
}

impl ItemBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content_type: Some("Text".to_string()),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: Option<EmailAddress>,
}

impl Recipient {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            email_address: Some(EmailAddress {
                name: None,
                address: Some(address.into()),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EmailAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupFlag {
    pub flag_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEvent {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub body: Option<ItemBody>,
    pub start: Option<DateTimeTimeZone>,
    pub end: Option<DateTimeTimeZone>,
    pub location: Option<Location>,
    pub organizer: Option<Recipient>,
    #[serde(default)]
    pub attendees: Vec<GraphAttendee>,
    pub is_all_day: Option<bool>,
    pub is_cancelled: Option<bool>,
    pub response_status: Option<GraphResponseStatus>,
    pub online_meeting: Option<OnlineMeetingInfo>,
    pub web_link: Option<String>,
}

/// A naive local datetime plus the zone it is expressed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTimeZone {
    pub date_time: Option<String>,
    pub time_zone: Option<String>,
}

impl DateTimeTimeZone {
    pub fn new(date_time: impl Into<String>, time_zone: impl Into<String>) -> Self {
        Self {
            date_time: Some(date_time.into()),
            time_zone: Some(time_zone.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphAttendee {
    pub email_address: Option<EmailAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GraphResponseStatus>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GraphResponseStatus {
    pub response: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMeetingInfo {
    pub join_url: Option<String>,
}

/// `POST /me/sendMail` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMailRequest {
    pub message: OutgoingGraphMessage,
    pub save_to_sent_items: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OutgoingGraphMessage {
    pub subject: String,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
}

/// `POST /me/messages/{id}/reply` body.
#[derive(Debug, Serialize)]
pub(crate) struct ReplyRequest {
    pub comment: String,
}

/// Body for `POST /me/events` and `PATCH /me/events/{id}`.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ItemBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTimeTimeZone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTimeTimeZone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<GraphAttendee>>,
}

/// Body for the `accept`, `decline` and `tentativelyAccept` actions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventResponseRequest {
    pub send_response: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_list() {
        let json = r#"{
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/me/mailFolders/inbox/messages?$skip=20",
            "value": [{
                "id": "AAMk1",
                "subject": "Lunch?",
                "from": {"emailAddress": {"name": "Ann", "address": "ann@example.com"}},
                "toRecipients": [{"emailAddress": {"address": "me@example.com"}}],
                "isRead": false,
                "flag": {"flagStatus": "flagged"}
            }]
        }"#;
        let list: GraphList<GraphMessage> = serde_json::from_str(json).unwrap();
        assert_eq!(list.value.len(), 1);
        assert!(list.next_link.is_some());
        assert_eq!(list.value[0].is_read, Some(false));
    }

    #[test]
    fn null_online_meeting() {
        let json = r#"{"id": "e", "onlineMeeting": null, "isAllDay": true}"#;
        let event: GraphEvent = serde_json::from_str(json).unwrap();
        assert!(event.online_meeting.is_none());
        assert_eq!(event.is_all_day, Some(true));
    }

    #[test]
    fn event_write_shape() {
        let body = EventWrite {
            subject: Some("1:1".into()),
            start: Some(DateTimeTimeZone::new("2025-02-05T10:00:00", "UTC")),
            attendees: Some(vec![GraphAttendee {
                email_address: Recipient::address("a@example.com").email_address,
                status: None,
                kind: Some("required".into()),
            }]),
            ..Default::default()
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["start"]["timeZone"], "UTC");
        assert_eq!(value["attendees"][0]["type"], "required");
        assert_eq!(value["attendees"][0]["emailAddress"]["address"], "a@example.com");
        assert!(value.get("body").is_none());
    }
}
