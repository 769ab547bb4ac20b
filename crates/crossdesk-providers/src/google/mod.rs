//! Gmail and Google Calendar adapter.
//!
//! - [`gmail`]: inbox listing, send/reply, label changes
//! - [`calendar`]: events on the primary calendar
//! - [`wire`]: JSON shapes for both APIs

mod calendar;
mod gmail;
pub mod wire;

use crossdesk_core::{Provider, ResponseStatus};

use crate::error::ProviderResult;
use crate::provider::{
    ApiEndpoints, BoxFuture, EventPatch, EventQuery, MailCalendarProvider, MessageQuery, NewEvent,
    OutgoingMessage,
};
use crate::raw::{EventPage, MessagePage, RawEvent, RawMessage, SendReceipt};

/// OAuth scopes requested for Google.
pub const GOOGLE_SCOPES: [&str; 6] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// Calls Gmail and Google Calendar with one access token.
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    http: reqwest::Client,
    gmail_base: String,
    calendar_base: String,
    access_token: String,
}

impl GoogleAdapter {
    pub fn new(http: reqwest::Client, endpoints: &ApiEndpoints, access_token: &str) -> Self {
        Self {
            http,
            gmail_base: endpoints.gmail.trim_end_matches('/').to_string(),
            calendar_base: endpoints.calendar.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn gmail(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/users/me{}", self.gmail_base, path))
            .bearer_auth(&self.access_token)
    }

    fn calendar(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(
                method,
                format!("{}/calendars/primary{}", self.calendar_base, path),
            )
            .bearer_auth(&self.access_token)
    }
}

impl MailCalendarProvider for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn list_messages(&self, query: MessageQuery) -> BoxFuture<'_, ProviderResult<MessagePage>> {
        Box::pin(async move { self.list_inbox(&query).await })
    }

    fn get_message<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<RawMessage>> {
        Box::pin(async move { self.fetch_message(id).await.map(RawMessage::Google) })
    }

    fn send_message<'a>(
        &'a self,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, ProviderResult<SendReceipt>> {
        Box::pin(async move { self.send_mime(message).await })
    }

    fn mark_read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.remove_label(id, "UNREAD").await })
    }

    fn archive<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.remove_label(id, "INBOX").await })
    }

    fn list_events(&self, query: EventQuery) -> BoxFuture<'_, ProviderResult<EventPage>> {
        Box::pin(async move { self.list_calendar_events(&query).await })
    }

    fn get_event<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move { self.fetch_event(id).await.map(RawEvent::Google) })
    }

    fn create_event<'a>(&'a self, event: &'a NewEvent) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move { self.insert_event(event).await.map(RawEvent::Google) })
    }

    fn update_event<'a>(
        &'a self,
        id: &'a str,
        patch: &'a EventPatch,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move { self.patch_event(id, patch).await.map(RawEvent::Google) })
    }

    fn delete_event<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.remove_event(id).await })
    }

    fn respond_to_event<'a>(
        &'a self,
        id: &'a str,
        response: ResponseStatus,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.set_self_response(id, response).await })
    }
}
