use crossdesk_core::{Provider, ResponseStatus};
use reqwest::Method;
use tracing::debug;

use super::wire::{
    DateTimeTimeZone, EventResponseRequest, EventWrite, GraphAttendee, GraphEvent, GraphList,
    ItemBody, Location, Recipient,
};
use super::{MicrosoftAdapter, next_token, skip_from_token};
use crate::error::{ProviderError, ProviderResult};
use crate::http;
use crate::provider::{EventPatch, EventQuery, NewEvent};
use crate::raw::{EventPage, RawEvent};

const EVENT_FIELDS: &str = "id,subject,body,start,end,location,organizer,attendees,isAllDay,\
isCancelled,responseStatus,onlineMeeting,webLink";

/// Asks Graph to express every returned time in UTC.
const PREFER_UTC: (&str, &str) = ("Prefer", "outlook.timezone=\"UTC\"");

/// Graph's action name for a canonical response.
fn response_action(response: ResponseStatus) -> Option<&'static str> {
    match response {
        ResponseStatus::Accepted => Some("accept"),
        ResponseStatus::Declined => Some("decline"),
        ResponseStatus::Tentative => Some("tentativelyAccept"),
        ResponseStatus::NeedsAction => None,
    }
}

fn required_attendees(emails: &[String]) -> Vec<GraphAttendee> {
    emails
        .iter()
        .map(|email| GraphAttendee {
            email_address: Recipient::address(email).email_address,
            status: None,
            kind: Some("required".to_string()),
        })
        .collect()
}

impl MicrosoftAdapter {
    pub(super) async fn calendar_view(&self, query: &EventQuery) -> ProviderResult<EventPage> {
        let skip = skip_from_token(query.page_token.as_deref())?;

        let mut request = self
            .graph(Method::GET, "/calendarView")
            .header(PREFER_UTC.0, PREFER_UTC.1)
            .query(&[
                ("startDateTime", query.window.start_string()),
                ("endDateTime", query.window.end_string()),
                ("$top", query.page_size.to_string()),
                ("$orderby", "start/dateTime".to_string()),
                ("$select", EVENT_FIELDS.to_string()),
            ]);
        if skip > 0 {
            request = request.query(&[("$skip", skip.to_string())]);
        }

        let list: GraphList<GraphEvent> = http::send_json(Provider::Microsoft, request).await?;
        debug!(count = list.value.len(), "fetched outlook calendar page");

        Ok(EventPage {
            next_page_token: next_token(list.next_link.is_some(), skip, query.page_size)?,
            events: list.value.into_iter().map(RawEvent::Microsoft).collect(),
        })
    }

    pub(super) async fn fetch_event(&self, id: &str) -> ProviderResult<GraphEvent> {
        let request = self
            .graph(Method::GET, &event_path(id))
            .header(PREFER_UTC.0, PREFER_UTC.1);
        http::send_json(Provider::Microsoft, request).await
    }

    pub(super) async fn insert_event(&self, event: &NewEvent) -> ProviderResult<GraphEvent> {
        let body = EventWrite {
            subject: Some(event.title.clone()),
            body: event.description.as_ref().map(ItemBody::text),
            start: Some(DateTimeTimeZone::new(&event.start, &event.timezone)),
            end: Some(DateTimeTimeZone::new(&event.end, &event.timezone)),
            location: event.location.as_ref().map(|name| Location {
                display_name: Some(name.clone()),
            }),
            attendees: (!event.attendees.is_empty()).then(|| required_attendees(&event.attendees)),
        };

        let request = self
            .graph(Method::POST, "/events")
            .header(PREFER_UTC.0, PREFER_UTC.1)
            .json(&body);
        http::send_json(Provider::Microsoft, request).await
    }

    pub(super) async fn patch_event(&self, id: &str, patch: &EventPatch) -> ProviderResult<GraphEvent> {
        let body = EventWrite {
            subject: patch.title.clone(),
            body: patch.description.as_ref().map(ItemBody::text),
            start: patch
                .start
                .as_ref()
                .map(|s| DateTimeTimeZone::new(s, patch.zone())),
            end: patch
                .end
                .as_ref()
                .map(|e| DateTimeTimeZone::new(e, patch.zone())),
            location: patch.location.as_ref().map(|name| Location {
                display_name: Some(name.clone()),
            }),
            attendees: patch.attendees.as_deref().map(required_attendees),
        };

        let request = self
            .graph(Method::PATCH, &event_path(id))
            .header(PREFER_UTC.0, PREFER_UTC.1)
            .json(&body);
        http::send_json(Provider::Microsoft, request).await
    }

    pub(super) async fn remove_event(&self, id: &str) -> ProviderResult<()> {
        let request = self.graph(Method::DELETE, &event_path(id));
        http::send_empty(Provider::Microsoft, request).await
    }

    pub(super) async fn post_response(&self, id: &str, response: ResponseStatus) -> ProviderResult<()> {
        let action = response_action(response).ok_or_else(|| {
            ProviderError::bad_request(format!("'{}' is not a valid response", response))
                .with_provider(Provider::Microsoft)
        })?;

        let request = self
            .graph(Method::POST, &format!("{}/{}", event_path(id), action))
            .json(&EventResponseRequest {
                send_response: true,
            });
        http::send_empty(Provider::Microsoft, request).await
    }
}

fn event_path(id: &str) -> String {
    format!("/events/{}", urlencoding::encode(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use crate::provider::ApiEndpoints;
    use chrono::{TimeZone, Utc};
    use crossdesk_core::TimeWindow;
    use serde_json::json;
    use wiremock::matchers::{body_json, body_partial_json, headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> MicrosoftAdapter {
        MicrosoftAdapter::new(
            reqwest::Client::new(),
            &ApiEndpoints::with_base(&server.uri()),
            "graph-token",
        )
    }

    #[test]
    fn action_names() {
        assert_eq!(response_action(ResponseStatus::Accepted), Some("accept"));
        assert_eq!(
            response_action(ResponseStatus::Tentative),
            Some("tentativelyAccept")
        );
        assert_eq!(response_action(ResponseStatus::NeedsAction), None);
    }

    #[tokio::test]
    async fn calendar_view_requests_utc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/calendarView"))
            .and(query_param("startDateTime", "2025-02-03T00:00:00+00:00"))
            .and(query_param("endDateTime", "2025-02-10T00:00:00+00:00"))
            .and(headers(
                "prefer",
                vec!["IdType=\"ImmutableId\"", "outlook.timezone=\"UTC\""],
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "ev1", "subject": "Review"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let now = Utc.with_ymd_and_hms(2025, 2, 5, 12, 0, 0).unwrap();
        let page = adapter(&server)
            .calendar_view(&EventQuery::new(TimeWindow::current_week(now), 50))
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn respond_posts_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/me/events/ev1/tentativelyAccept"))
            .and(body_json(json!({"sendResponse": true})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        adapter(&server)
            .post_response("ev1", ResponseStatus::Tentative)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn respond_rejects_needs_action() {
        let server = MockServer::start().await;
        let err = adapter(&server)
            .post_response("ev1", ResponseStatus::NeedsAction)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn create_event_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1.0/me/events"))
            .and(body_partial_json(json!({
                "subject": "Design review",
                "body": {"contentType": "Text", "content": "Agenda"},
                "location": {"displayName": "Room 4"},
                "attendees": [{"emailAddress": {"address": "a@example.com"}, "type": "required"}]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "ev-new"})))
            .expect(1)
            .mount(&server)
            .await;

        let event = NewEvent::new("Design review", "2025-02-05T10:00:00", "2025-02-05T11:00:00")
            .with_description("Agenda")
            .with_location("Room 4")
            .with_attendees(vec!["a@example.com".into()]);
        let created = adapter(&server).insert_event(&event).await.unwrap();
        assert_eq!(created.id.as_deref(), Some("ev-new"));
    }

    #[tokio::test]
    async fn delete_event_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1.0/me/events/ev1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        adapter(&server).remove_event("ev1").await.unwrap();
    }
}
