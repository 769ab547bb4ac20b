//! The [`MailCalendarProvider`] capability set and the factory that builds
//! one adapter per access token.
//!
//! Adapters make uninterpreted wire calls: they never retry, never refresh
//! tokens and never normalize. Every failure is a single [`ProviderError`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crossdesk_core::{Provider, ResponseStatus, TimeWindow};

use crate::error::{ProviderError, ProviderResult};
use crate::google::GoogleAdapter;
use crate::microsoft::MicrosoftAdapter;
use crate::raw::{EventPage, MessagePage, RawEvent, RawMessage, SendReceipt};

/// A boxed future for async trait methods.
///
/// Keeps [`MailCalendarProvider`] object-safe so adapters can be selected at
/// runtime by provider tag.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default HTTP timeout for provider calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for listing inbox messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    /// Provider search expression; `None` lists the inbox.
    pub query: Option<String>,
    pub page_size: u32,
    pub page_token: Option<String>,
}

impl MessageQuery {
    pub fn new(page_size: u32) -> Self {
        Self {
            query: None,
            page_size,
            page_token: None,
        }
    }

    /// Builder method to set the search expression. Blank strings are ignored.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.trim().is_empty()).then_some(query);
        self
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }
}

/// Parameters for listing events in a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub window: TimeWindow,
    pub page_size: u32,
    pub page_token: Option<String>,
}

impl EventQuery {
    pub fn new(window: TimeWindow, page_size: u32) -> Self {
        Self {
            window,
            page_size,
            page_token: None,
        }
    }

    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }
}

/// A message to send, optionally as a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Comma-separated recipient addresses.
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Provider id of the message being replied to.
    pub reply_to_id: Option<String>,
}

impl OutgoingMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            reply_to_id: None,
        }
    }

    pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to_id = Some(id.into());
        self
    }

    /// Splits `to` into trimmed, non-empty addresses.
    pub fn recipients(&self) -> Vec<&str> {
        self.to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Fields for a new event. `start` and `end` are local times in `timezone`
/// or carry their own offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub start: String,
    pub end: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub timezone: String,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            start: start.into(),
            end: end.into(),
            description: None,
            location: None,
            attendees: Vec::new(),
            timezone: "UTC".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_attendees(mut self, attendees: Vec<String>) -> Self {
        self.attendees = attendees;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

/// A partial update. Only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Option<Vec<String>>,
    /// Zone applied to `start` and `end`; defaults to UTC when either is set.
    pub timezone: Option<String>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.attendees.is_none()
    }

    pub(crate) fn zone(&self) -> &str {
        self.timezone.as_deref().unwrap_or("UTC")
    }
}

/// The mail and calendar operations every provider supports.
///
/// Implementations hold one access token and talk to exactly one provider.
pub trait MailCalendarProvider: Send + Sync {
    /// Which provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Lists inbox messages, fully fetched.
    fn list_messages(&self, query: MessageQuery) -> BoxFuture<'_, ProviderResult<MessagePage>>;

    fn get_message<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<RawMessage>>;

    /// Sends a new message, or a reply when `reply_to_id` is set.
    fn send_message<'a>(
        &'a self,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, ProviderResult<SendReceipt>>;

    /// Marks a message read. Idempotent.
    fn mark_read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>>;

    /// Moves a message out of the inbox. Idempotent.
    fn archive<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>>;

    fn list_events(&self, query: EventQuery) -> BoxFuture<'_, ProviderResult<EventPage>>;

    fn get_event<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<RawEvent>>;

    fn create_event<'a>(&'a self, event: &'a NewEvent) -> BoxFuture<'a, ProviderResult<RawEvent>>;

    fn update_event<'a>(
        &'a self,
        id: &'a str,
        patch: &'a EventPatch,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>>;

    fn delete_event<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>>;

    /// Sends the user's response to an invitation.
    ///
    /// `needsAction` is not a response and is rejected.
    fn respond_to_event<'a>(
        &'a self,
        id: &'a str,
        response: ResponseStatus,
    ) -> BoxFuture<'a, ProviderResult<()>>;
}

/// Builds adapters bound to an access token.
///
/// The engine asks for a fresh adapter per valid token so adapters never
/// see expired credentials.
pub trait AdapterFactory: Send + Sync {
    fn adapter(&self, provider: Provider, access_token: &str) -> Box<dyn MailCalendarProvider>;
}

/// Base URLs for each REST surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub gmail: String,
    pub calendar: String,
    pub graph: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            gmail: "https://gmail.googleapis.com/gmail/v1".to_string(),
            calendar: "https://www.googleapis.com/calendar/v3".to_string(),
            graph: "https://graph.microsoft.com/v1.0".to_string(),
        }
    }
}

impl ApiEndpoints {
    /// Points every surface at one host, keeping the usual path prefixes.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            gmail: format!("{}/gmail/v1", base),
            calendar: format!("{}/calendar/v3", base),
            graph: format!("{}/v1.0", base),
        }
    }
}

/// The production factory: one shared HTTP client, real REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpAdapters {
    http: reqwest::Client,
    endpoints: ApiEndpoints,
}

impl HttpAdapters {
    /// Creates a factory with its own HTTP client.
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
                    .with_source(e)
            })?;
        Ok(Self::with_client(http))
    }

    /// Creates a factory sharing an existing HTTP client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            endpoints: ApiEndpoints::default(),
        }
    }

    /// Builder method to override the REST base URLs.
    pub fn with_endpoints(mut self, endpoints: ApiEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }
}

impl AdapterFactory for HttpAdapters {
    fn adapter(&self, provider: Provider, access_token: &str) -> Box<dyn MailCalendarProvider> {
        match provider {
            Provider::Google => Box::new(GoogleAdapter::new(
                self.http.clone(),
                &self.endpoints,
                access_token,
            )),
            Provider::Microsoft => Box::new(MicrosoftAdapter::new(
                self.http.clone(),
                &self.endpoints,
                access_token,
            )),
        }
    }
}
