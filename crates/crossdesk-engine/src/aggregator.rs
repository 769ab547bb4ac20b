//! Fan-out across connected providers and merge into one view.
//!
//! Each eligible provider runs as its own branch: valid token, adapter call,
//! normalization. Branches run in parallel under a timeout and never fail
//! the aggregate; a failing branch contributes no items and one
//! `"{provider}: {message}"` entry in the error list.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossdesk_core::{
    CanonicalEvent, CanonicalMessage, ConflictReport, ConnectedProviders, Provider,
    ResponseStatus, TimeWindow, detect_conflicts,
};
use crossdesk_providers::{
    AdapterFactory, DEFAULT_TIMEOUT, EventPatch, EventQuery, MailCalendarProvider, MessageQuery,
    NewEvent, OutgoingMessage, ProviderError, SendReceipt, normalize_event, normalize_events,
    normalize_message, normalize_messages,
};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::vault::CredentialVault;

/// Items requested per provider when neither the request nor config says.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Pages followed per provider for one calendar listing.
pub const MAX_EVENT_PAGES: usize = 10;

/// Parameters for an aggregated inbox listing.
#[derive(Debug, Clone, Default)]
pub struct MessageRequest {
    /// Restrict to one provider.
    pub provider: Option<Provider>,
    /// Provider-native search expression.
    pub query: Option<String>,
    pub page_size: Option<u32>,
    /// Reverse the merged order.
    pub newest_first: bool,
}

impl MessageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }
}

/// Parameters for an aggregated calendar listing.
#[derive(Debug, Clone, Default)]
pub struct EventRequest {
    pub provider: Option<Provider>,
    /// Defaults to the current Monday-to-Monday week.
    pub window: Option<TimeWindow>,
    pub page_size: Option<u32>,
}

impl EventRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageAggregate {
    pub messages: Vec<CanonicalMessage>,
    pub total: usize,
    pub unread: usize,
    pub providers: Vec<Provider>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventAggregate {
    pub events: Vec<CanonicalEvent>,
    pub total: usize,
    pub window: TimeWindow,
    pub providers: Vec<Provider>,
    pub errors: Vec<String>,
}

/// The week's merged events with their conflicts.
#[derive(Debug, Clone, Serialize)]
pub struct Briefing {
    #[serde(flatten)]
    pub calendar: EventAggregate,
    pub conflicts: ConflictReport,
}

/// One provider's items, with a note when they are incomplete.
struct BranchItems<T> {
    items: Vec<T>,
    truncated: Option<String>,
}

impl<T> From<Vec<T>> for BranchItems<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            truncated: None,
        }
    }
}

/// Merged branch output before sorting.
struct FanOut<T> {
    items: Vec<T>,
    providers: Vec<Provider>,
    errors: Vec<String>,
}

/// Cross-provider reads plus provider-routed single-item operations.
#[derive(Clone)]
pub struct Aggregator {
    vault: CredentialVault,
    adapters: Arc<dyn AdapterFactory>,
    page_size: u32,
    provider_timeout: Duration,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("vault", &self.vault)
            .field("page_size", &self.page_size)
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    pub fn new(vault: CredentialVault, adapters: Arc<dyn AdapterFactory>) -> Self {
        Self {
            vault,
            adapters,
            page_size: DEFAULT_PAGE_SIZE,
            provider_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Creates an aggregator using the `[aggregate]` settings.
    pub fn from_config(
        vault: CredentialVault,
        adapters: Arc<dyn AdapterFactory>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(vault, adapters)
            .with_page_size(config.aggregate.page_size)
            .with_provider_timeout(config.provider_timeout())
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// An adapter bound to a currently valid token.
    async fn adapter(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> EngineResult<Box<dyn MailCalendarProvider>> {
        let token = self.vault.access_token(user_id, provider).await?;
        Ok(self.adapters.adapter(provider, &token))
    }

    async fn run_branch<T, F, Fut>(
        &self,
        user_id: &str,
        provider: Provider,
        branch: &F,
    ) -> EngineResult<BranchItems<T>>
    where
        F: Fn(Box<dyn MailCalendarProvider>) -> Fut,
        Fut: Future<Output = EngineResult<BranchItems<T>>>,
    {
        let adapter = self.adapter(user_id, provider).await?;
        branch(adapter).await
    }

    /// Runs `branch` for every eligible connected provider.
    ///
    /// A missing credential skips its provider silently. Every other failure,
    /// including `CredentialInvalid` and `RefreshRejected`, is reported in
    /// `errors` as `"{provider}: {detail}"`. The single-provider operations
    /// return those two errors as-is; a `RefreshRejected` there carries the
    /// [`EngineError::needs_reauthorization`] hint. A timed-out branch and a
    /// truncated listing are reported in `errors` too.
    async fn fan_out<T, F, Fut>(&self, user_id: &str, filter: Option<Provider>, branch: F) -> FanOut<T>
    where
        F: Fn(Box<dyn MailCalendarProvider>) -> Fut,
        Fut: Future<Output = EngineResult<BranchItems<T>>>,
    {
        let connected = match self.vault.connected_providers(user_id).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(user_id, error = %e, "could not list connected providers");
                return FanOut {
                    items: Vec::new(),
                    providers: Vec::new(),
                    errors: vec![format!("credentials: {}", e)],
                };
            }
        };
        let providers = connected.eligible(filter);

        let branches = providers.iter().map(|&provider| {
            let branch = &branch;
            async move {
                let outcome =
                    tokio::time::timeout(self.provider_timeout, self.run_branch(user_id, provider, branch))
                        .await;
                (provider, outcome)
            }
        });

        let mut fan_out = FanOut {
            items: Vec::new(),
            providers: providers.clone(),
            errors: Vec::new(),
        };
        for (provider, outcome) in join_all(branches).await {
            match outcome {
                Ok(Ok(branch)) => {
                    debug!(user_id, %provider, count = branch.items.len(), "provider branch finished");
                    if let Some(note) = branch.truncated {
                        fan_out.errors.push(format!("{}: {}", provider, note));
                    }
                    fan_out.items.extend(branch.items);
                }
                Ok(Err(EngineError::CredentialMissing { .. })) => {
                    debug!(user_id, %provider, "credential disappeared, skipping provider");
                }
                Ok(Err(e)) => {
                    warn!(user_id, %provider, error = %e, "provider branch failed");
                    fan_out.errors.push(format!("{}: {}", provider, e.detail()));
                }
                Err(_) => {
                    warn!(user_id, %provider, "provider branch timed out");
                    fan_out.errors.push(format!(
                        "{}: timed out after {}s",
                        provider,
                        self.provider_timeout.as_secs()
                    ));
                }
            }
        }
        fan_out
    }

    /// Lists inbox messages across providers, oldest first unless asked otherwise.
    pub async fn list_messages(&self, user_id: &str, request: &MessageRequest) -> MessageAggregate {
        let mut query = MessageQuery::new(request.page_size.unwrap_or(self.page_size));
        if let Some(q) = &request.query {
            query = query.with_query(q.clone());
        }

        let fan_out = self
            .fan_out(user_id, request.provider, |adapter| {
                let query = query.clone();
                async move {
                    let page = adapter.list_messages(query).await?;
                    Ok::<_, EngineError>(BranchItems::from(normalize_messages(&page.messages)))
                }
            })
            .await;

        let mut messages = fan_out.items;
        messages.sort_by(|a, b| a.date.cmp(&b.date));
        if request.newest_first {
            messages.reverse();
        }

        MessageAggregate {
            total: messages.len(),
            unread: messages.iter().filter(|m| m.is_unread).count(),
            messages,
            providers: fan_out.providers,
            errors: fan_out.errors,
        }
    }

    /// Lists events across providers in ascending start order.
    pub async fn list_events(&self, user_id: &str, request: &EventRequest) -> EventAggregate {
        self.list_events_at(user_id, request, Utc::now()).await
    }

    /// Like [`list_events`](Self::list_events) with an explicit "now" for the default window.
    pub async fn list_events_at(
        &self,
        user_id: &str,
        request: &EventRequest,
        now: DateTime<Utc>,
    ) -> EventAggregate {
        let window = request
            .window
            .clone()
            .unwrap_or_else(|| TimeWindow::current_week(now));
        let query = EventQuery::new(window.clone(), request.page_size.unwrap_or(self.page_size));

        let fan_out = self
            .fan_out(user_id, request.provider, |adapter| {
                let query = query.clone();
                async move { collect_event_pages(adapter.as_ref(), query).await }
            })
            .await;

        let mut events = fan_out.items;
        events.sort_by(|a, b| a.start.cmp(&b.start));

        EventAggregate {
            total: events.len(),
            events,
            window,
            providers: fan_out.providers,
            errors: fan_out.errors,
        }
    }

    /// The current week's merged events plus conflict detection.
    pub async fn briefing(&self, user_id: &str, now: DateTime<Utc>) -> Briefing {
        let calendar = self
            .list_events_at(user_id, &EventRequest::new(), now)
            .await;
        let conflicts = detect_conflicts(&calendar.events);
        info!(
            user_id,
            events = calendar.total,
            conflicts = conflicts.total,
            "built briefing"
        );
        Briefing {
            calendar,
            conflicts,
        }
    }

    pub async fn get_message(
        &self,
        user_id: &str,
        provider: Provider,
        id: &str,
    ) -> EngineResult<CanonicalMessage> {
        let adapter = self.adapter(user_id, provider).await?;
        let raw = adapter.get_message(id).await?;
        normalize_message(&raw)
            .ok_or_else(|| EngineError::MalformedResponse(format!("{} message has no id", provider)))
    }

    /// Sends a new message, or a reply when `reply_to_id` is set.
    pub async fn send_message(
        &self,
        user_id: &str,
        provider: Provider,
        message: &OutgoingMessage,
    ) -> EngineResult<SendReceipt> {
        let adapter = self.adapter(user_id, provider).await?;
        let receipt = adapter.send_message(message).await?;
        info!(user_id, %provider, reply = message.reply_to_id.is_some(), "sent message");
        Ok(receipt)
    }

    pub async fn mark_read(&self, user_id: &str, provider: Provider, id: &str) -> EngineResult<()> {
        let adapter = self.adapter(user_id, provider).await?;
        Ok(adapter.mark_read(id).await?)
    }

    pub async fn archive(&self, user_id: &str, provider: Provider, id: &str) -> EngineResult<()> {
        let adapter = self.adapter(user_id, provider).await?;
        Ok(adapter.archive(id).await?)
    }

    pub async fn get_event(
        &self,
        user_id: &str,
        provider: Provider,
        id: &str,
    ) -> EngineResult<CanonicalEvent> {
        let adapter = self.adapter(user_id, provider).await?;
        let raw = adapter.get_event(id).await?;
        event_or_malformed(provider, normalize_event(&raw))
    }

    pub async fn create_event(
        &self,
        user_id: &str,
        provider: Provider,
        event: &NewEvent,
    ) -> EngineResult<CanonicalEvent> {
        let adapter = self.adapter(user_id, provider).await?;
        let raw = adapter.create_event(event).await?;
        event_or_malformed(provider, normalize_event(&raw))
    }

    pub async fn update_event(
        &self,
        user_id: &str,
        provider: Provider,
        id: &str,
        patch: &EventPatch,
    ) -> EngineResult<CanonicalEvent> {
        if patch.is_empty() {
            return Err(ProviderError::bad_request("no fields to update")
                .with_provider(provider)
                .into());
        }
        let adapter = self.adapter(user_id, provider).await?;
        let raw = adapter.update_event(id, patch).await?;
        event_or_malformed(provider, normalize_event(&raw))
    }

    pub async fn delete_event(&self, user_id: &str, provider: Provider, id: &str) -> EngineResult<()> {
        let adapter = self.adapter(user_id, provider).await?;
        Ok(adapter.delete_event(id).await?)
    }

    pub async fn respond_to_event(
        &self,
        user_id: &str,
        provider: Provider,
        id: &str,
        response: ResponseStatus,
    ) -> EngineResult<()> {
        let adapter = self.adapter(user_id, provider).await?;
        adapter.respond_to_event(id, response).await?;
        info!(user_id, %provider, %response, "responded to event");
        Ok(())
    }

    pub async fn connected_providers(&self, user_id: &str) -> EngineResult<ConnectedProviders> {
        self.vault.connected_providers(user_id).await
    }

    pub async fn disconnect(&self, user_id: &str, provider: Provider) -> EngineResult<bool> {
        self.vault.disconnect(user_id, provider).await
    }

    /// Removes every stored credential of the user.
    pub async fn delete_account(&self, user_id: &str) -> EngineResult<usize> {
        self.vault.delete_user(user_id).await
    }
}

/// Follows `next_page_token` until the window is exhausted or
/// [`MAX_EVENT_PAGES`] pages have been read.
async fn collect_event_pages(
    adapter: &dyn MailCalendarProvider,
    mut query: EventQuery,
) -> EngineResult<BranchItems<CanonicalEvent>> {
    let mut events = Vec::new();
    for page_number in 1..=MAX_EVENT_PAGES {
        let page = adapter.list_events(query.clone()).await?;
        events.extend(normalize_events(&page.events));
        match page.next_page_token {
            Some(token) if page_number < MAX_EVENT_PAGES => query = query.with_page_token(token),
            Some(_) => {
                warn!(provider = %adapter.provider(), pages = MAX_EVENT_PAGES, "event listing truncated");
                return Ok(BranchItems {
                    items: events,
                    truncated: Some(format!("more events after {} pages", MAX_EVENT_PAGES)),
                });
            }
            None => break,
        }
    }
    Ok(events.into())
}

fn event_or_malformed(
    provider: Provider,
    event: Option<CanonicalEvent>,
) -> EngineResult<CanonicalEvent> {
    event.ok_or_else(|| EngineError::MalformedResponse(format!("{} event has no id", provider)))
}
