//! Speech collaborators
//!
//! The call engine depends only on [`Transcriber`] and [`Synthesizer`].
//! [`stt`] and [`tts`] provide HTTP-backed implementations.

mod audio;
pub mod stt;
pub mod tts;

use async_trait::async_trait;

use crate::Result;

pub use audio::{MIN_SPEECH, is_too_short, pcm16_to_wav, wav_duration};
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

/// Turns a caller recording into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio. An empty string means nothing was said.
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Turns reply text into playable audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` to WAV audio
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}
