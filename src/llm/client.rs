//! OpenAI-compatible streaming chat client

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{LlmError, ModelClient, TokenStream};
use crate::config::LlmConfig;
use crate::conversation::Message;

/// Streams chat completions over server-sent events
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    max_tokens: u32,
    api_key: Option<SecretString>,
}

impl ChatClient {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl ModelClient for ChatClient {
    async fn stream_chat(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: &'a [Message],
            max_tokens: u32,
            stream: bool,
        }

        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream: true,
        };

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "starting chat completion"
        );

        let mut builder = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "chat request failed");
            LlmError::from_transport(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            let message = status.canonical_reason().unwrap_or("unexpected status");
            return Err(LlmError::from_status(status.as_u16(), message));
        }

        Ok(token_stream(response.bytes_stream()))
    }
}

/// Turn a server-sent event body into reply tokens
///
/// Events without a content delta are skipped; a broken body ends the reply
/// with [`LlmError::Stream`].
pub fn token_stream<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    body.eventsource()
        .filter_map(|event| async move {
            match event {
                Ok(event) => content_delta(&event.data).map(Ok),
                Err(e) => {
                    tracing::warn!(error = %e, "chat stream interrupted");
                    Some(Err(LlmError::Stream(e.to_string())))
                }
            }
        })
        .boxed()
}

/// Content delta carried by one event's data, if any
///
/// The `[DONE]` sentinel, malformed JSON and empty deltas are skipped.
fn content_delta(data: &str) -> Option<String> {
    let data = data.trim();
    if data == "[DONE]" {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed stream event");
            return None;
        }
    };
    let delta = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;

    (!delta.is_empty()).then(|| delta.to_string())
}
