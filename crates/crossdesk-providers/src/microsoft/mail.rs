use crossdesk_core::Provider;
use reqwest::Method;
use serde_json::json;
use tracing::debug;

use super::wire::{
    GraphList, GraphMessage, ItemBody, OutgoingGraphMessage, Recipient, ReplyRequest,
    SendMailRequest,
};
use super::{MicrosoftAdapter, next_token, skip_from_token};
use crate::error::{ProviderError, ProviderResult};
use crate::http;
use crate::provider::{MessageQuery, OutgoingMessage};
use crate::raw::{MessagePage, RawMessage, SendReceipt};

const MESSAGE_FIELDS: &str =
    "id,subject,from,toRecipients,receivedDateTime,isRead,bodyPreview,body,conversationId,flag";

impl MicrosoftAdapter {
    pub(super) async fn list_inbox(&self, query: &MessageQuery) -> ProviderResult<MessagePage> {
        let skip = skip_from_token(query.page_token.as_deref())?;

        let mut request = self.graph(Method::GET, "/mailFolders/inbox/messages").query(&[
            ("$top", query.page_size.to_string()),
            ("$select", MESSAGE_FIELDS.to_string()),
        ]);
        if skip > 0 {
            request = request.query(&[("$skip", skip.to_string())]);
        }
        // Graph rejects $orderby combined with $search.
        match &query.query {
            Some(search) => {
                let quoted = format!("\"{}\"", search.replace('"', ""));
                request = request.query(&[("$search", quoted)]);
            }
            None => {
                request = request.query(&[("$orderby", "receivedDateTime desc")]);
            }
        }

        let list: GraphList<GraphMessage> = http::send_json(Provider::Microsoft, request).await?;
        debug!(count = list.value.len(), "fetched outlook inbox page");

        Ok(MessagePage {
            next_page_token: next_token(list.next_link.is_some(), skip, query.page_size)?,
            messages: list.value.into_iter().map(RawMessage::Microsoft).collect(),
        })
    }

    pub(super) async fn fetch_message(&self, id: &str) -> ProviderResult<GraphMessage> {
        let request = self.graph(Method::GET, &message_path(id));
        http::send_json(Provider::Microsoft, request).await
    }

    /// Replies go through the `reply` action so Graph threads them; new
    /// messages use `sendMail`. Both answer 202 with no body.
    pub(super) async fn send_mail(&self, message: &OutgoingMessage) -> ProviderResult<SendReceipt> {
        let request = match &message.reply_to_id {
            Some(reply_id) => self
                .graph(Method::POST, &format!("{}/reply", message_path(reply_id)))
                .json(&ReplyRequest {
                    comment: message.body.clone(),
                }),
            None => {
                let recipients = message.recipients();
                if recipients.is_empty() {
                    return Err(ProviderError::bad_request("message has no recipients")
                        .with_provider(Provider::Microsoft));
                }
                self.graph(Method::POST, "/sendMail").json(&SendMailRequest {
                    message: OutgoingGraphMessage {
                        subject: message.subject.clone(),
                        body: ItemBody::text(&message.body),
                        to_recipients: recipients.into_iter().map(Recipient::address).collect(),
                    },
                    save_to_sent_items: true,
                })
            }
        };

        http::send_empty(Provider::Microsoft, request).await?;
        Ok(SendReceipt::accepted(Provider::Microsoft))
    }

    pub(super) async fn set_read(&self, id: &str) -> ProviderResult<()> {
        let request = self
            .graph(Method::PATCH, &message_path(id))
            .json(&json!({"isRead": true}));
        http::send_empty(Provider::Microsoft, request).await
    }

    pub(super) async fn move_to_archive(&self, id: &str) -> ProviderResult<()> {
        let request = self
            .graph(Method::POST, &format!("{}/move", message_path(id)))
            .json(&json!({"destinationId": "archive"}));
        http::send_empty(Provider::Microsoft, request).await
    }
}

fn message_path(id: &str) -> String {
    format!("/messages/{}", urlencoding::encode(id))
}
