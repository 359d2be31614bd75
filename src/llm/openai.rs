//! OpenAI-compatible chat completions client

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{ChatMessage, Responder};
use crate::retry::{RetryPolicy, delay_for_attempt, is_recoverable};
use crate::{Error, Result};

/// Limit on a single completion attempt
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat completions client used as the call [`Responder`]
pub struct ChatClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatCompletionResponse {
    fn first_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens,
            temperature,
            retry: RetryPolicy::immediate(0),
        })
    }

    /// Retry rate-limited and server-error responses within one reply
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Responder for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let url = format!("{}/chat/completions", self.base_url);

        let mut attempt = 0;
        let response = loop {
            let response = self
                .client
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&request)
                .send()
                .await
                .map_err(|e| Error::Llm(format!("chat request failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                break response;
            }

            if is_recoverable(status.as_u16()) && attempt < self.retry.max_retries {
                let delay = delay_for_attempt(&self.retry, attempt);
                tracing::warn!(status = %status, attempt = attempt + 1, "chat API busy, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        };

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("failed to parse chat response: {e}")))?;

        parsed
            .first_content()
            .ok_or_else(|| Error::Llm("chat response had no content".to_string()))
    }
}
