//! Outlook mail and calendar through Microsoft Graph.

mod calendar;
mod mail;
pub mod wire;

use crossdesk_core::{Provider, ResponseStatus};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    ApiEndpoints, BoxFuture, EventPatch, EventQuery, MailCalendarProvider, MessageQuery, NewEvent,
    OutgoingMessage,
};
use crate::raw::{EventPage, MessagePage, RawEvent, RawMessage, SendReceipt};

/// OAuth scopes requested for Microsoft.
pub const MICROSOFT_SCOPES: [&str; 7] = [
    "Mail.Read",
    "Mail.Send",
    "Mail.ReadWrite",
    "Calendars.Read",
    "Calendars.ReadWrite",
    "User.Read",
    "offline_access",
];

/// Keeps message and event ids stable across folder moves.
const PREFER_IMMUTABLE_IDS: (&str, &str) = ("Prefer", "IdType=\"ImmutableId\"");

/// Calls Microsoft Graph with one access token.
#[derive(Debug, Clone)]
pub struct MicrosoftAdapter {
    http: reqwest::Client,
    graph_base: String,
    access_token: String,
}

impl MicrosoftAdapter {
    pub fn new(http: reqwest::Client, endpoints: &ApiEndpoints, access_token: &str) -> Self {
        Self {
            http,
            graph_base: endpoints.graph.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn graph(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/me{}", self.graph_base, path))
            .bearer_auth(&self.access_token)
            .header(PREFER_IMMUTABLE_IDS.0, PREFER_IMMUTABLE_IDS.1)
    }
}

/// Graph pages with `$skip`; the page token is the offset of the next page.
fn skip_from_token(token: Option<&str>) -> ProviderResult<u32> {
    match token {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ProviderError::bad_request(format!("invalid page token: {}", raw))
                .with_provider(Provider::Microsoft)
        }),
    }
}

fn next_token(has_more: bool, skip: u32, page_size: u32) -> ProviderResult<Option<String>> {
    if !has_more {
        return Ok(None);
    }
    skip.checked_add(page_size)
        .map(|next| Some(next.to_string()))
        .ok_or_else(|| {
            ProviderError::bad_request(format!("page offset out of range: {} + {}", skip, page_size))
                .with_provider(Provider::Microsoft)
        })
}

impl MailCalendarProvider for MicrosoftAdapter {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    fn list_messages(&self, query: MessageQuery) -> BoxFuture<'_, ProviderResult<MessagePage>> {
        Box::pin(async move { self.list_inbox(&query).await })
    }

    fn get_message<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<RawMessage>> {
        Box::pin(async move { self.fetch_message(id).await.map(RawMessage::Microsoft) })
    }

    fn send_message<'a>(
        &'a self,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, ProviderResult<SendReceipt>> {
        Box::pin(async move { self.send_mail(message).await })
    }

    fn mark_read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.set_read(id).await })
    }

    fn archive<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.move_to_archive(id).await })
    }

    fn list_events(&self, query: EventQuery) -> BoxFuture<'_, ProviderResult<EventPage>> {
        Box::pin(async move { self.calendar_view(&query).await })
    }

    fn get_event<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move { self.fetch_event(id).await.map(RawEvent::Microsoft) })
    }

    fn create_event<'a>(&'a self, event: &'a NewEvent) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move { self.insert_event(event).await.map(RawEvent::Microsoft) })
    }

    fn update_event<'a>(
        &'a self,
        id: &'a str,
        patch: &'a EventPatch,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move { self.patch_event(id, patch).await.map(RawEvent::Microsoft) })
    }

    fn delete_event<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.remove_event(id).await })
    }

    fn respond_to_event<'a>(
        &'a self,
        id: &'a str,
        response: ResponseStatus,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.post_response(id, response).await })
    }
}
