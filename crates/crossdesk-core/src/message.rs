//! Canonical mail message type.

use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// A provider-agnostic mail item.
///
/// Produced fresh on every fetch and never persisted by this workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub id: String,
    pub thread_id: String,
    pub provider: Provider,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    /// ISO-8601 with explicit offset when the provider's date could be parsed,
    /// otherwise the provider's string unchanged.
    pub date: String,
    pub is_unread: bool,
    pub is_starred: bool,
    pub labels: Vec<String>,
}

impl CanonicalMessage {
    /// Creates a message with the identifying fields set and everything else empty.
    pub fn new(id: impl Into<String>, provider: Provider) -> Self {
        Self {
            id: id.into(),
            thread_id: String::new(),
            provider,
            from: String::new(),
            to: String::new(),
            subject: "(no subject)".to_string(),
            snippet: String::new(),
            body: String::new(),
            date: String::new(),
            is_unread: false,
            is_starred: false,
            labels: Vec::new(),
        }
    }

    /// Builder method to set the date.
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    /// Builder method to set the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Builder method to set the unread flag.
    pub fn with_unread(mut self, unread: bool) -> Self {
        self.is_unread = unread;
        self
    }

    /// Returns the body, or the snippet when the body is empty.
    pub fn text_or_snippet(&self) -> &str {
        if self.body.trim().is_empty() {
            &self.snippet
        } else {
            &self.body
        }
    }
}
