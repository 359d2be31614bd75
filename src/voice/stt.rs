//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::Transcriber;
use crate::{Error, Result};

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEEPGRAM_URL: &str = "https://api.deepgram.com/v1/listen";

/// Whole-request limit, covering upload of the recording
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramResponse {
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript.trim().to_string())
            .unwrap_or_default()
    }
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes caller recordings to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new_whisper(api_key: SecretString, model: String) -> Result<Self> {
        Self::with_provider(SttProvider::Whisper, api_key, model)
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        Self::with_provider(SttProvider::Deepgram, api_key, model)
    }

    /// Create an STT instance for the given provider
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn with_provider(provider: SttProvider, api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            let which = match provider {
                SttProvider::Whisper => "OpenAI API key required for Whisper",
                SttProvider::Deepgram => "Deepgram API key required",
            };
            return Err(Error::Config(which.to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            api_key,
            model,
            provider,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Stt(format!("Whisper request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("failed to parse Whisper response: {e}")))?;

        Ok(result.text.trim().to_string())
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post(DEEPGRAM_URL)
            .query(&[("model", self.model.as_str()), ("punctuate", "true")])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| Error::Stt(format!("Deepgram request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("failed to parse Deepgram response: {e}")))?;

        Ok(result.into_transcript())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let transcript = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await?,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await?,
        };
        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}
