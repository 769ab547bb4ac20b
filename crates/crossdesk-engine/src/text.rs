//! Boundary to the text-generation service and the features built on it.
//!
//! No vendor client lives here. Callers inject a [`TextService`]; this module
//! owns the prompt shapes, best-effort JSON extraction, bounded scans,
//! detached side work and the streamed relay with its deferred write.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crossdesk_core::{CanonicalMessage, Provider};
use crossdesk_providers::BoxFuture;
use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Default cap on concurrent text-service calls in a bulk scan.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Message bodies are cut to this many characters before prompting.
pub const MAX_BODY_CHARS: usize = 3000;

const MAX_TITLE_SOURCE_CHARS: usize = 500;

const RELAY_BUFFER: usize = 64;

/// Text chunks as they arrive from the service.
pub type TextStream = BoxStream<'static, EngineResult<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// One request to the text service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextRequest {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub max_tokens: u32,
}

impl TextRequest {
    /// A single user turn.
    pub fn prompt(content: impl Into<String>) -> Self {
        Self {
            system: None,
            turns: vec![Turn {
                role: Role::User,
                content: content.into(),
            }],
            max_tokens: 500,
        }
    }

    /// A request continuing an existing conversation.
    pub fn conversation(turns: Vec<Turn>) -> Self {
        Self {
            system: None,
            turns,
            max_tokens: 2000,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The last user turn, if any.
    pub fn last_prompt(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

/// A text-generation backend.
pub trait TextService: Send + Sync {
    /// Returns the full completion.
    fn complete(&self, request: TextRequest) -> BoxFuture<'_, EngineResult<String>>;

    /// Returns the completion as a stream of chunks.
    fn stream(&self, request: TextRequest) -> BoxFuture<'_, EngineResult<TextStream>>;
}

/// Pulls a JSON value out of free-form model output.
///
/// Tries, in order: a fenced ```` ```json ```` block, any fenced block, the
/// span from the first `{` or `[` to the last matching closer, and finally
/// the whole text.
pub fn extract_json(text: &str) -> EngineResult<serde_json::Value> {
    let candidate = json_candidate(text).trim();
    serde_json::from_str(candidate).map_err(|e| {
        EngineError::MalformedResponse(format!("no JSON found in text output: {}", e))
    })
}

/// [`extract_json`] followed by typed deserialization.
pub fn extract_json_as<T: DeserializeOwned>(text: &str) -> EngineResult<T> {
    let value = extract_json(text)?;
    serde_json::from_value(value)
        .map_err(|e| EngineError::MalformedResponse(format!("unexpected JSON shape: {}", e)))
}

fn json_candidate(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some((_, rest)) = text.split_once("```") {
        return rest.split("```").next().unwrap_or(rest);
    }
    let Some(start) = text.find(['{', '[']) else {
        return text;
    };
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    match text.rfind(closer) {
        Some(end) if end > start => &text[start..=end],
        _ => text,
    }
}

/// Truncates to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Triage fields for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailCategory {
    pub sender_type: String,
    pub priority: String,
    pub category: String,
    pub summary: String,
    pub requires_response: bool,
}

impl Default for EmailCategory {
    /// The record used when the service output cannot be read.
    fn default() -> Self {
        Self {
            sender_type: "unknown".into(),
            priority: "normal".into(),
            category: "uncategorized".into(),
            summary: "Unable to categorize this email.".into(),
            requires_response: true,
        }
    }
}

fn categorize_prompt(message: &CanonicalMessage) -> String {
    format!(
        "Analyze this email and return a JSON object with these fields:\n\
         - sender_type: one of \"colleague\", \"customer\", \"vendor\", \"personal\", \"automated\", \"unknown\"\n\
         - priority: one of \"urgent\", \"high\", \"normal\", \"low\"\n\
         - category: a short label such as \"request\", \"inquiry\", \"invitation\", \"report\", \"notification\", \"follow_up\"\n\
         - summary: one or two sentences\n\
         - requires_response: boolean\n\n\
         From: {}\nSubject: {}\nBody:\n{}",
        message.from,
        message.subject,
        truncate_chars(message.text_or_snippet(), MAX_BODY_CHARS)
    )
}

/// Categorizes a message. Unreadable output yields [`EmailCategory::default`].
pub async fn categorize_email(
    service: &dyn TextService,
    message: &CanonicalMessage,
) -> EngineResult<EmailCategory> {
    let output = service
        .complete(TextRequest::prompt(categorize_prompt(message)))
        .await?;
    match extract_json_as::<EmailCategory>(&output) {
        Ok(category) => Ok(category),
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "using fallback email category");
            Ok(EmailCategory::default())
        }
    }
}

/// An action item proposed from a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSuggestion {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub due_date: Option<String>,
}

fn default_priority() -> String {
    "normal".into()
}

/// The suggestions found in one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailTasks {
    pub email_id: String,
    pub email_provider: Provider,
    pub email_subject: String,
    pub email_from: String,
    pub email_date: String,
    pub tasks: Vec<TaskSuggestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub suggestions: Vec<EmailTasks>,
    pub emails_scanned: usize,
    pub tasks_found: usize,
    pub skipped_already_scanned: usize,
}

fn tasks_prompt(message: &CanonicalMessage) -> String {
    format!(
        "List the action items the recipient of this email should act on. \
         Return a JSON array of objects with fields title, description, \
         priority (\"high\", \"normal\" or \"low\") and due_date (ISO date or null). \
         Return [] if there are none.\n\n\
         From: {}\nSubject: {}\nDate: {}\nBody:\n{}",
        message.from,
        message.subject,
        message.date,
        truncate_chars(message.text_or_snippet(), MAX_BODY_CHARS)
    )
}

/// Extracts task suggestions from messages with bounded concurrency.
///
/// Messages whose id is in `already_scanned` are skipped. A failing or
/// unreadable call drops only that message.
#[derive(Clone)]
pub struct TaskScanner {
    service: Arc<dyn TextService>,
    max_concurrency: usize,
}

impl TaskScanner {
    pub fn new(service: Arc<dyn TextService>) -> Self {
        Self {
            service,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Creates a scanner capped by `[text].max_concurrency`.
    pub fn from_config(service: Arc<dyn TextService>, config: &EngineConfig) -> Self {
        Self::new(service).with_max_concurrency(config.text.max_concurrency)
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn scan(
        &self,
        messages: &[CanonicalMessage],
        already_scanned: &HashSet<String>,
    ) -> ScanReport {
        let to_scan: Vec<&CanonicalMessage> = messages
            .iter()
            .filter(|m| !already_scanned.contains(&m.id))
            .collect();
        let skipped = messages.len() - to_scan.len();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let results = join_all(to_scan.into_iter().map(|message| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                self.extract(message).await
            }
        }))
        .await;

        let suggestions: Vec<EmailTasks> = results.into_iter().flatten().collect();
        let tasks_found = suggestions.iter().map(|s| s.tasks.len()).sum();
        info!(
            scanned = messages.len(),
            skipped,
            tasks_found,
            "scanned messages for tasks"
        );
        ScanReport {
            suggestions,
            emails_scanned: messages.len(),
            tasks_found,
            skipped_already_scanned: skipped,
        }
    }

    async fn extract(&self, message: &CanonicalMessage) -> Option<EmailTasks> {
        let output = match self
            .service
            .complete(TextRequest::prompt(tasks_prompt(message)))
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "task extraction failed");
                return None;
            }
        };
        let tasks = match extract_json_as::<Vec<TaskSuggestion>>(&output) {
            Ok(tasks) => tasks,
            Err(e) => {
                debug!(message_id = %message.id, error = %e, "no readable tasks in output");
                return None;
            }
        };
        if tasks.is_empty() {
            return None;
        }
        Some(EmailTasks {
            email_id: message.id.clone(),
            email_provider: message.provider,
            email_subject: message.subject.clone(),
            email_from: message.from.clone(),
            email_date: message.date.clone(),
            tasks,
        })
    }
}

/// Runs `work` in the background. Failure is only logged.
pub fn spawn_detached<F>(name: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = EngineResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match work.await {
            Ok(()) => debug!(task = name, "detached task finished"),
            Err(e) => warn!(task = name, error = %e, "detached task failed"),
        }
    })
}

/// Where generated conversation titles are written.
pub trait TitleSink: Send + Sync {
    fn set_title<'a>(
        &'a self,
        conversation_id: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, EngineResult<()>>;
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Generates a short title from the first message without blocking the caller.
pub fn generate_title_detached(
    service: Arc<dyn TextService>,
    sink: Arc<dyn TitleSink>,
    conversation_id: String,
    first_message: String,
) -> JoinHandle<()> {
    spawn_detached("generate_title", async move {
        let prompt = format!(
            "Generate a very short title (3-6 words, no quotes) for a conversation \
             that starts with this message:\n\n{}",
            truncate_chars(&first_message, MAX_TITLE_SOURCE_CHARS)
        );
        let output = service
            .complete(TextRequest::prompt(prompt).with_max_tokens(30))
            .await?;
        let title = clean_title(&output);
        if title.is_empty() {
            return Err(EngineError::MalformedResponse("empty title".into()));
        }
        sink.set_title(&conversation_id, &title).await
    })
}

/// Durable storage for a finished assistant reply.
pub trait TranscriptSink: Send + Sync {
    /// Stores the reply and returns its message id.
    fn save<'a>(
        &'a self,
        conversation_id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, EngineResult<String>>;
}

/// Frames sent to the transport while relaying a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Delta { content: String },
    Error { content: String },
    Done { message_id: Option<String> },
}

/// Streams a reply to the returned receiver and saves it once complete.
///
/// The save happens after the last chunk, through `sink`, and its failure
/// still ends the relay with `Done` (without a message id). A stream error
/// ends the relay with `Error` and nothing is saved. Dropping the receiver
/// abandons the stream without saving.
pub fn relay_stream(
    service: Arc<dyn TextService>,
    sink: Arc<dyn TranscriptSink>,
    conversation_id: String,
    request: TextRequest,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    tokio::spawn(async move {
        let mut stream = match service.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "could not start reply stream");
                let _ = tx.send(StreamEvent::Error { content: e.to_string() }).await;
                return;
            }
        };

        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    full.push_str(&text);
                    if tx.send(StreamEvent::Delta { content: text }).await.is_err() {
                        debug!(conversation_id = %conversation_id, "receiver dropped, abandoning reply stream");
                        return;
                    }
                }
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "reply stream failed");
                    let _ = tx.send(StreamEvent::Error { content: e.to_string() }).await;
                    return;
                }
            }
        }

        let message_id = match sink.save(&conversation_id, &full).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "failed to save assistant reply");
                None
            }
        };
        let _ = tx.send(StreamEvent::Done { message_id }).await;
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies by matching a substring of the last prompt.
    #[derive(Default)]
    struct ScriptedService {
        replies: Vec<(&'static str, Result<&'static str, &'static str>)>,
        chunks: Vec<Result<&'static str, &'static str>>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl TextService for ScriptedService {
        fn complete(&self, request: TextRequest) -> BoxFuture<'_, EngineResult<String>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                let prompt = request.last_prompt().unwrap_or_default().to_string();
                let reply = self
                    .replies
                    .iter()
                    .find(|(needle, _)| prompt.contains(needle))
                    .map(|(_, reply)| *reply)
                    .unwrap_or(Ok("[]"));
                reply
                    .map(str::to_string)
                    .map_err(|e| EngineError::MalformedResponse(e.to_string()))
            })
        }

        fn stream(&self, _request: TextRequest) -> BoxFuture<'_, EngineResult<TextStream>> {
            let chunks: Vec<EngineResult<String>> = self
                .chunks
                .iter()
                .copied()
                .map(|c| {
                    c.map(str::to_string)
                        .map_err(|e| EngineError::MalformedResponse(e.to_string()))
                })
                .collect();
            Box::pin(async move { Ok(futures_util::stream::iter(chunks).boxed()) })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl TranscriptSink for RecordingSink {
        fn save<'a>(
            &'a self,
            conversation_id: &'a str,
            content: &'a str,
        ) -> BoxFuture<'a, EngineResult<String>> {
            Box::pin(async move {
                if self.fail {
                    return Err(EngineError::store("disk full"));
                }
                self.saved
                    .lock()
                    .unwrap()
                    .push((conversation_id.to_string(), content.to_string()));
                Ok("msg-1".to_string())
            })
        }
    }

    impl TitleSink for RecordingSink {
        fn set_title<'a>(
            &'a self,
            conversation_id: &'a str,
            title: &'a str,
        ) -> BoxFuture<'a, EngineResult<()>> {
            Box::pin(async move {
                self.saved
                    .lock()
                    .unwrap()
                    .push((conversation_id.to_string(), title.to_string()));
                Ok(())
            })
        }
    }

    fn message(id: &str, subject: &str) -> CanonicalMessage {
        let mut m = CanonicalMessage::new(id, Provider::Google).with_subject(subject);
        m.body = format!("body of {id}");
        m
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n{\"priority\": \"high\"}\n```\nThanks";
        assert_eq!(extract_json(text).unwrap()["priority"], "high");

        let text = "```\n[1, 2]\n```";
        assert_eq!(extract_json(text).unwrap(), serde_json::json!([1, 2]));
    }

    #[test]
    fn extracts_embedded_json() {
        let text = "Sure. {\"a\": {\"b\": 1}} Hope that helps.";
        assert_eq!(extract_json(text).unwrap(), serde_json::json!({"a": {"b": 1}}));

        let text = "Tasks: [{\"title\": \"Reply\"}] done";
        let tasks: Vec<TaskSuggestion> = extract_json_as(text).unwrap();
        assert_eq!(tasks[0].title, "Reply");
        assert_eq!(tasks[0].priority, "normal");
    }

    #[test]
    fn malformed_output_is_typed() {
        for text in ["no json at all", "{ broken", "``` not json ```", ""] {
            assert!(
                matches!(extract_json(text), Err(EngineError::MalformedResponse(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars(&"é".repeat(4000), MAX_BODY_CHARS).chars().count(), 3000);
    }

    #[tokio::test]
    async fn categorize_falls_back_on_unreadable_output() {
        let service = ScriptedService {
            replies: vec![("Subject: Hello", Ok("I cannot help with that."))],
            ..Default::default()
        };
        let category = categorize_email(&service, &message("1", "Hello")).await.unwrap();
        assert_eq!(category, EmailCategory::default());
    }

    #[tokio::test]
    async fn categorize_reads_partial_json() {
        let service = ScriptedService {
            replies: vec![(
                "Subject: Invoice",
                Ok("```json\n{\"priority\": \"urgent\", \"category\": \"request\"}\n```"),
            )],
            ..Default::default()
        };
        let category = categorize_email(&service, &message("1", "Invoice")).await.unwrap();
        assert_eq!(category.priority, "urgent");
        assert_eq!(category.category, "request");
        assert_eq!(category.sender_type, "unknown");
    }

    #[tokio::test]
    async fn categorize_propagates_service_errors() {
        let service = ScriptedService {
            replies: vec![("Subject: Down", Err("service unavailable"))],
            ..Default::default()
        };
        assert!(categorize_email(&service, &message("1", "Down")).await.is_err());
    }

    #[tokio::test]
    async fn scan_respects_concurrency_cap() {
        let service = Arc::new(ScriptedService {
            replies: vec![("Subject: Action", Ok("[{\"title\": \"Do it\"}]"))],
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let messages: Vec<_> = (0..12)
            .map(|i| message(&format!("m{i}"), if i % 2 == 0 { "Action" } else { "FYI" }))
            .collect();

        let scanner = TaskScanner::new(service.clone()).with_max_concurrency(3);
        let report = scanner.scan(&messages, &HashSet::new()).await;

        assert_eq!(report.emails_scanned, 12);
        assert_eq!(report.suggestions.len(), 6);
        assert_eq!(report.tasks_found, 6);
        assert_eq!(service.calls.load(Ordering::SeqCst), 12);
        assert!(service.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn scanner_cap_comes_from_config() {
        let service = Arc::new(ScriptedService {
            replies: vec![("Subject: Action", Ok("[{\"title\": \"Do it\"}]"))],
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let messages: Vec<_> = (0..8).map(|i| message(&format!("m{i}"), "Action")).collect();

        let config = EngineConfig::default().with_max_concurrency(1);
        let scanner = TaskScanner::from_config(service.clone(), &config);
        assert_eq!(scanner.max_concurrency(), 1);

        let report = scanner.scan(&messages, &HashSet::new()).await;
        assert_eq!(report.tasks_found, 8);
        assert_eq!(service.max_in_flight.load(Ordering::SeqCst), 1);

        let default_scanner = TaskScanner::from_config(service, &EngineConfig::default());
        assert_eq!(default_scanner.max_concurrency(), DEFAULT_MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn scan_skips_known_and_failing_messages() {
        let service = Arc::new(ScriptedService {
            replies: vec![
                ("Subject: Broken", Err("timeout")),
                ("Subject: Action", Ok("[{\"title\": \"Call back\", \"due_date\": \"2024-03-15\"}]")),
            ],
            ..Default::default()
        });
        let messages = vec![
            message("a", "Action"),
            message("b", "Broken"),
            message("c", "Action"),
        ];
        let seen: HashSet<String> = ["c".to_string()].into_iter().collect();

        let report = TaskScanner::new(service.clone()).scan(&messages, &seen).await;
        assert_eq!(report.skipped_already_scanned, 1);
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].email_id, "a");
        assert_eq!(
            report.suggestions[0].tasks[0].due_date.as_deref(),
            Some("2024-03-15")
        );
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn relay_forwards_chunks_then_saves_once() {
        let service = Arc::new(ScriptedService {
            chunks: vec![Ok("Hel"), Ok("lo"), Ok("!")],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());

        let mut rx = relay_stream(
            service,
            sink.clone(),
            "conv-1".into(),
            TextRequest::prompt("hi"),
        );
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta { content: "Hel".into() },
                StreamEvent::Delta { content: "lo".into() },
                StreamEvent::Delta { content: "!".into() },
                StreamEvent::Done { message_id: Some("msg-1".into()) },
            ]
        );
        assert_eq!(
            sink.saved.lock().unwrap().clone(),
            vec![("conv-1".to_string(), "Hello!".to_string())]
        );
    }

    #[tokio::test]
    async fn relay_error_skips_save() {
        let service = Arc::new(ScriptedService {
            chunks: vec![Ok("partial"), Err("connection reset")],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());

        let mut rx = relay_stream(service, sink.clone(), "c".into(), TextRequest::prompt("hi"));
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(StreamEvent::Error { .. })));
        assert!(sink.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn relay_save_failure_still_finishes() {
        let service = Arc::new(ScriptedService {
            chunks: vec![Ok("done")],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });

        let mut rx = relay_stream(service, sink, "c".into(), TextRequest::prompt("hi"));
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(StreamEvent::Done { message_id: None }));
    }

    #[test]
    fn stream_event_wire_shape() {
        let json = serde_json::to_value(StreamEvent::Delta { content: "x".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "delta", "content": "x"}));
        let json = serde_json::to_value(StreamEvent::Done { message_id: Some("m".into()) }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "done", "message_id": "m"}));
    }

    #[tokio::test]
    async fn title_generation_is_detached_and_cleaned() {
        let service = Arc::new(ScriptedService {
            replies: vec![("Generate a very short title", Ok("  \"Quarterly Budget Review\"\n"))],
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());

        generate_title_detached(
            service,
            sink.clone(),
            "conv-9".into(),
            "Can we go over the Q3 budget?".into(),
        )
        .await
        .unwrap();

        assert_eq!(
            sink.saved.lock().unwrap().clone(),
            vec![("conv-9".to_string(), "Quarterly Budget Review".to_string())]
        );
    }

    #[tokio::test]
    async fn detached_failure_does_not_panic() {
        let handle = spawn_detached("failing", async { Err(EngineError::store("nope")) });
        assert!(handle.await.is_ok());
    }
}
