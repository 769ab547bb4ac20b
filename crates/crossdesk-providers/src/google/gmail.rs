use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use crossdesk_core::Provider;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use reqwest::Method;
use tracing::debug;

use super::GoogleAdapter;
use super::wire::{GmailMessage, GmailMessageList, GmailMessageRef, GmailModifyRequest, GmailSendRequest};
use crate::error::ProviderResult;
use crate::http;
use crate::provider::{MessageQuery, OutgoingMessage};
use crate::raw::{MessagePage, RawMessage, SendReceipt};

/// How many full-message fetches run at once for one listing.
const FETCH_CONCURRENCY: usize = 5;

impl GoogleAdapter {
    /// The list endpoint only returns ids, so each message is fetched in full.
    pub(super) async fn list_inbox(&self, query: &MessageQuery) -> ProviderResult<MessagePage> {
        let mut request = self.gmail(Method::GET, "/messages").query(&[
            ("maxResults", query.page_size.to_string()),
            ("labelIds", "INBOX".to_string()),
        ]);
        if let Some(q) = &query.query {
            request = request.query(&[("q", q)]);
        }
        if let Some(token) = &query.page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let list: GmailMessageList = http::send_json(Provider::Google, request).await?;
        let ids: Vec<String> = list.messages.into_iter().filter_map(|m| m.id).collect();

        let messages: Vec<RawMessage> = stream::iter(ids)
            .map(|id| async move { self.fetch_message(&id).await })
            .buffered(FETCH_CONCURRENCY)
            .map_ok(RawMessage::Google)
            .try_collect()
            .await?;

        debug!(count = messages.len(), "fetched gmail inbox page");
        Ok(MessagePage {
            messages,
            next_page_token: list.next_page_token,
        })
    }

    pub(super) async fn fetch_message(&self, id: &str) -> ProviderResult<GmailMessage> {
        let request = self
            .gmail(Method::GET, &format!("/messages/{}", urlencoding::encode(id)))
            .query(&[("format", "full")]);
        http::send_json(Provider::Google, request).await
    }

    /// Sends a plain-text message. Replies join the original thread and
    /// reference its `Message-ID`.
    pub(super) async fn send_mime(&self, message: &OutgoingMessage) -> ProviderResult<SendReceipt> {
        let mut thread_id = None;
        let mut in_reply_to = None;
        let mut subject = message.subject.clone();

        if let Some(reply_id) = &message.reply_to_id {
            let request = self
                .gmail(
                    Method::GET,
                    &format!("/messages/{}", urlencoding::encode(reply_id)),
                )
                .query(&[
                    ("format", "metadata"),
                    ("metadataHeaders", "Message-ID"),
                    ("metadataHeaders", "Subject"),
                ]);
            let original: GmailMessage = http::send_json(Provider::Google, request).await?;

            thread_id = original.thread_id.clone();
            in_reply_to = original.header("Message-ID").map(str::to_string);
            if subject.trim().is_empty() {
                subject = reply_subject(original.header("Subject").unwrap_or_default());
            }
        }

        let mime = build_mime(&message.to, &subject, &message.body, in_reply_to.as_deref());
        let body = GmailSendRequest {
            raw: URL_SAFE.encode(mime.as_bytes()),
            thread_id,
        };

        let request = self.gmail(Method::POST, "/messages/send").json(&body);
        let sent: GmailMessageRef = http::send_json(Provider::Google, request).await?;
        debug!(id = ?sent.id, "gmail message sent");

        Ok(SendReceipt {
            provider: Provider::Google,
            id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    pub(super) async fn remove_label(&self, id: &str, label: &str) -> ProviderResult<()> {
        let body = GmailModifyRequest {
            remove_label_ids: vec![label.to_string()],
            ..Default::default()
        };
        let request = self
            .gmail(
                Method::POST,
                &format!("/messages/{}/modify", urlencoding::encode(id)),
            )
            .json(&body);
        http::send_empty(Provider::Google, request).await
    }
}

fn reply_subject(original: &str) -> String {
    if original
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        original.to_string()
    } else {
        format!("Re: {}", original)
    }
}

/// Header values must stay on one line.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-word for non-ASCII headers.
fn encode_header(value: &str) -> String {
    let value = header_value(value);
    if value.is_ascii() {
        value
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn build_mime(to: &str, subject: &str, body: &str, in_reply_to: Option<&str>) -> String {
    let mut mime = String::new();
    mime.push_str(&format!("To: {}\r\n", header_value(to)));
    mime.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
    if let Some(id) = in_reply_to {
        let id = header_value(id);
        mime.push_str(&format!("In-Reply-To: {}\r\nReferences: {}\r\n", id, id));
    }
    mime.push_str("MIME-Version: 1.0\r\n");
    mime.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    mime.push_str("Content-Transfer-Encoding: base64\r\n\r\n");

    let encoded = STANDARD.encode(body.as_bytes());
    for line in encoded.as_bytes().chunks(76) {
        mime.push_str(&String::from_utf8_lossy(line));
        mime.push_str("\r\n");
    }
    mime
}
