//! Text-to-speech (TTS) processing
//!
//! Both providers return WAV so Asterisk can play the file directly.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{Synthesizer, pcm16_to_wav};
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// ElevenLabs raw PCM output rate
const ELEVENLABS_PCM_RATE: u32 = 16_000;

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

#[derive(serde::Serialize)]
struct OpenAiSpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
}

#[derive(serde::Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new_openai(api_key: SecretString, model: String, voice: String, speed: f32) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            api_key,
            voice,
            speed,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new_elevenlabs(api_key: SecretString, model: String, voice_id: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            api_key,
            voice: voice_id,
            // ElevenLabs has no speed control
            speed: 1.0,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        let request = OpenAiSpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "wav",
        };

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(format!("OpenAI TTS request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{ELEVENLABS_URL}/{}", self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .query(&[("output_format", format!("pcm_{ELEVENLABS_PCM_RATE}"))])
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Tts(format!("ElevenLabs request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let pcm = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        pcm16_to_wav(&pcm, ELEVENLABS_PCM_RATE)
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), provider = ?self.provider, "synthesizing speech");
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }
}
