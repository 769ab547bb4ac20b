//! Request execution and response-to-error mapping shared by every adapter.

use crossdesk_core::Provider;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Sends a request and converts transport failures and non-2xx statuses.
pub(crate) async fn send(provider: Provider, request: RequestBuilder) -> ProviderResult<Response> {
    let response = request.send().await.map_err(|e| {
        let err = if e.is_timeout() {
            ProviderError::network("request timeout")
        } else if e.is_connect() {
            ProviderError::network(format!("connection failed: {}", e))
        } else {
            ProviderError::network(format!("request failed: {}", e))
        };
        err.with_provider(provider).with_source(e)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(status_error(provider, response).await)
}

/// Sends a request and decodes the JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: Provider,
    request: RequestBuilder,
) -> ProviderResult<T> {
    let response = send(provider, request).await?;
    read_json(provider, response).await
}

/// Sends a request whose response body is irrelevant.
pub(crate) async fn send_empty(provider: Provider, request: RequestBuilder) -> ProviderResult<()> {
    send(provider, request).await.map(|_| ())
}

async fn read_json<T: DeserializeOwned>(provider: Provider, response: Response) -> ProviderResult<T> {
    let body = response.text().await.map_err(|e| {
        ProviderError::network(format!("failed to read response: {}", e))
            .with_provider(provider)
            .with_source(e)
    })?;

    serde_json::from_str(&body).map_err(|e| {
        ProviderError::invalid_response(format!("failed to parse response: {}", e))
            .with_provider(provider)
            .with_source(e)
    })
}

async fn status_error(provider: Provider, response: Response) -> ProviderError {
    let status = response.status();

    let retry_after = (status == StatusCode::TOO_MANY_REQUESTS)
        .then(|| {
            response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
        })
        .flatten();

    let body = response.text().await.unwrap_or_default();
    let detail = error_message(&body).unwrap_or(body);
    debug!(provider = %provider, status = status.as_u16(), "provider request failed");

    let mut message = format!("API error ({}): {}", status, detail.trim());
    if let Some(secs) = retry_after {
        message.push_str(&format!(", retry after {} seconds", secs));
    }

    ProviderError::from_status(status.as_u16(), message).with_provider(provider)
}

/// Pulls the human-readable message out of a provider error body.
///
/// Google and Graph nest it as `{"error": {"message": ...}}`; OAuth token
/// endpoints use `{"error": "code", "error_description": ...}`.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(code) => Some(
            match value.get("error_description").and_then(Value::as_str) {
                Some(description) => format!("{}: {}", code, description),
                None => code.clone(),
            },
        ),
        error @ Value::Object(_) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
