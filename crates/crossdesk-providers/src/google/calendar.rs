use crossdesk_core::{Provider, ResponseStatus};
use reqwest::Method;
use tracing::debug;

use super::GoogleAdapter;
use super::wire::{CalendarEvent, CalendarEventList, EventAttendee, EventDateTime, EventWrite};
use crate::error::{ProviderError, ProviderResult};
use crate::http;
use crate::provider::{EventPatch, EventQuery, NewEvent};
use crate::raw::{EventPage, RawEvent};

/// Attendees are notified of every change made through this adapter.
const SEND_UPDATES: (&str, &str) = ("sendUpdates", "all");

impl GoogleAdapter {
    pub(super) async fn list_calendar_events(&self, query: &EventQuery) -> ProviderResult<EventPage> {
        let mut request = self.calendar(Method::GET, "/events").query(&[
            ("timeMin", query.window.start_string()),
            ("timeMax", query.window.end_string()),
            ("maxResults", query.page_size.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ]);
        if let Some(token) = &query.page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let list: CalendarEventList = http::send_json(Provider::Google, request).await?;
        debug!(count = list.items.len(), "fetched google calendar page");

        Ok(EventPage {
            events: list.items.into_iter().map(RawEvent::Google).collect(),
            next_page_token: list.next_page_token,
        })
    }

    pub(super) async fn fetch_event(&self, id: &str) -> ProviderResult<CalendarEvent> {
        let request = self.calendar(Method::GET, &event_path(id));
        http::send_json(Provider::Google, request).await
    }

    pub(super) async fn insert_event(&self, event: &NewEvent) -> ProviderResult<CalendarEvent> {
        let body = EventWrite {
            summary: Some(event.title.clone()),
            description: event.description.clone(),
            location: event.location.clone(),
            start: Some(EventDateTime::timed(&event.start, &event.timezone)),
            end: Some(EventDateTime::timed(&event.end, &event.timezone)),
            attendees: (!event.attendees.is_empty())
                .then(|| event.attendees.iter().map(EventAttendee::invite).collect()),
        };

        let request = self
            .calendar(Method::POST, "/events")
            .query(&[SEND_UPDATES])
            .json(&body);
        http::send_json(Provider::Google, request).await
    }

    pub(super) async fn patch_event(
        &self,
        id: &str,
        patch: &EventPatch,
    ) -> ProviderResult<CalendarEvent> {
        let body = EventWrite {
            summary: patch.title.clone(),
            description: patch.description.clone(),
            location: patch.location.clone(),
            start: patch
                .start
                .as_ref()
                .map(|s| EventDateTime::timed(s, patch.zone())),
            end: patch
                .end
                .as_ref()
                .map(|e| EventDateTime::timed(e, patch.zone())),
            attendees: patch
                .attendees
                .as_ref()
                .map(|list| list.iter().map(EventAttendee::invite).collect()),
        };
        self.write_patch(id, &body).await
    }

    pub(super) async fn remove_event(&self, id: &str) -> ProviderResult<()> {
        let request = self
            .calendar(Method::DELETE, &event_path(id))
            .query(&[SEND_UPDATES]);
        http::send_empty(Provider::Google, request).await
    }

    /// Rewrites the caller's own attendee entry and patches the full list back.
    pub(super) async fn set_self_response(
        &self,
        id: &str,
        response: ResponseStatus,
    ) -> ProviderResult<()> {
        if !response.is_reply() {
            return Err(ProviderError::bad_request(format!(
                "'{}' is not a valid response",
                response
            ))
            .with_provider(Provider::Google));
        }

        let mut event = self.fetch_event(id).await?;
        let me = event
            .attendees
            .iter_mut()
            .find(|a| a.is_self == Some(true))
            .ok_or_else(|| {
                ProviderError::bad_request("the authenticated user is not an attendee of this event")
                    .with_provider(Provider::Google)
            })?;
        me.response_status = Some(response.as_str().to_string());

        let body = EventWrite {
            attendees: Some(event.attendees),
            ..Default::default()
        };
        self.write_patch(id, &body).await.map(|_| ())
    }

    async fn write_patch(&self, id: &str, body: &EventWrite) -> ProviderResult<CalendarEvent> {
        let request = self
            .calendar(Method::PATCH, &event_path(id))
            .query(&[SEND_UPDATES])
            .json(body);
        http::send_json(Provider::Google, request).await
    }
}

fn event_path(id: &str) -> String {
    format!("/events/{}", urlencoding::encode(id))
}
