//! TOML configuration file loading
//!
//! Supports `~/.config/advisor/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AdvisorConfigFile {
    /// Asterisk REST interface connection
    #[serde(default)]
    pub ari: AriFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Per-call limits
    #[serde(default)]
    pub call: CallFileConfig,

    /// Lead storage
    #[serde(default)]
    pub leads: LeadsFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// ARI connection settings
#[derive(Debug, Default, Deserialize)]
pub struct AriFileConfig {
    /// Base URL, e.g. `http://localhost:8088`
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Stasis application name
    pub app: Option<String>,
    /// Directory shared with Asterisk for playback files
    pub sound_dir: Option<String>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4-turbo-preview")
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
}

/// Speech processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "deepgram" or "whisper"
    pub stt_provider: Option<String>,

    /// STT model (e.g. "nova-2")
    pub stt_model: Option<String>,

    /// "openai" or "elevenlabs"
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Per-call limits
#[derive(Debug, Default, Deserialize)]
pub struct CallFileConfig {
    /// Completed exchanges before the call is closed
    pub max_turns: Option<u32>,
    /// Longest single caller recording, in seconds
    pub max_capture_secs: Option<u64>,
    /// Silence that ends a recording, in seconds
    pub max_silence_secs: Option<u64>,
    /// DTMF key that ends a recording
    pub terminate_on: Option<String>,
    /// Limit on one speech or reply request, in seconds
    pub step_timeout_secs: Option<u64>,
    /// Time calls get to close on hang-up or shutdown, in seconds
    pub shutdown_grace_secs: Option<u64>,
}

/// Lead storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct LeadsFileConfig {
    /// "sqlite" or "jsonl"
    pub backend: Option<String>,
    /// Override the storage file path
    pub path: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Status API port
    pub port: Option<u16>,

    /// Data directory for the lead store
    pub data_dir: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config_file(content: &str) -> Result<AdvisorConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `AdvisorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AdvisorConfigFile {
    let Some(path) = config_file_path() else {
        return AdvisorConfigFile::default();
    };

    if !path.exists() {
        return AdvisorConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                AdvisorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AdvisorConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/advisor/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("advisor").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let fc = parse_config_file("").unwrap();
        assert!(fc.ari.url.is_none());
        assert!(fc.call.max_turns.is_none());
    }

    #[test]
    fn partial_sections() {
        let fc = parse_config_file(
            r#"
            [ari]
            url = "http://pbx.internal:8088"
            app = "advisor"

            [voice]
            stt_provider = "whisper"
            tts_speed = 1.25

            [call]
            max_turns = 6
            shutdown_grace_secs = 4
            "#,
        )
        .unwrap();

        assert_eq!(fc.ari.url.as_deref(), Some("http://pbx.internal:8088"));
        assert_eq!(fc.ari.app.as_deref(), Some("advisor"));
        assert!(fc.ari.password.is_none());
        assert_eq!(fc.voice.stt_provider.as_deref(), Some("whisper"));
        assert_eq!(fc.voice.tts_speed, Some(1.25));
        assert_eq!(fc.call.max_turns, Some(6));
        assert_eq!(fc.call.shutdown_grace_secs, Some(4));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(parse_config_file("[call]\nmax_turns = \"many\"").is_err());
    }
}
