//! Configuration management for the advisor gateway
//!
//! Priority is environment, then the TOML file, then defaults.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::call::{MAX_TURNS, STEP_TIMEOUT};
use crate::call::dispatcher::DEFAULT_GRACE;
use crate::telephony::{AriConfig, CaptureOptions, MAX_CAPTURE, MAX_SILENCE};
use crate::voice::stt::SttProvider;
use crate::voice::tts::TtsProvider;
use crate::{Error, Result};

use file::AdvisorConfigFile;

/// Default status API port
pub const DEFAULT_PORT: u16 = 18790;

/// Advisor gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Asterisk connection
    pub ari: AriSettings,

    /// API keys
    pub api_keys: ApiKeys,

    /// Reply generation
    pub llm: LlmConfig,

    /// Speech providers
    pub voice: VoiceConfig,

    /// Per-call limits
    pub call: CallConfig,

    /// Lead storage
    pub leads: LeadsConfig,

    /// Path to data directory (database, lead log)
    pub data_dir: PathBuf,

    /// Status API port
    pub port: u16,
}

/// ARI connection settings
#[derive(Debug, Clone)]
pub struct AriSettings {
    pub url: String,
    pub username: String,
    pub password: Option<SecretString>,
    pub app: String,
    pub sound_dir: PathBuf,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    pub deepgram: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
}

/// Chat completion settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub base_url: String,
}

/// Speech provider settings
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,
    pub stt_model: String,
    pub tts_provider: TtsProvider,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
}

/// Per-call limits
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub max_turns: u32,
    pub capture: CaptureOptions,
    /// Limit on one transcription, reply, or synthesis request
    pub step_timeout: Duration,
    pub shutdown_grace: Duration,
}

/// Where finished leads go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadBackend {
    Sqlite,
    Jsonl,
}

impl FromStr for LeadBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "jsonl" | "json" => Ok(Self::Jsonl),
            other => Err(Error::Config(format!("unknown lead backend: {other}"))),
        }
    }
}

/// Lead storage settings
#[derive(Debug, Clone)]
pub struct LeadsConfig {
    pub backend: LeadBackend,
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but malformed
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but malformed
    pub fn from_sources(
        fc: AdvisorConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let secret = |key: &str, file_value: Option<String>| {
            env(key)
                .or(file_value)
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };

        let data_dir = env("ADVISOR_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        // ARI (env > toml > default)
        let ari = AriSettings {
            url: env("ARI_URL")
                .or(fc.ari.url)
                .unwrap_or_else(|| "http://localhost:8088".to_string()),
            username: env("ARI_USERNAME")
                .or(fc.ari.username)
                .unwrap_or_else(|| "ai_agent".to_string()),
            password: secret("ARI_PASSWORD", fc.ari.password),
            app: env("ARI_APP")
                .or(fc.ari.app)
                .unwrap_or_else(|| "ai-call-center".to_string()),
            sound_dir: env("ADVISOR_SOUND_DIR")
                .or(fc.ari.sound_dir)
                .map_or_else(std::env::temp_dir, PathBuf::from),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
        };

        let llm = LlmConfig {
            model: env("ADVISOR_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4-turbo-preview".to_string()),
            max_tokens: parse_env(&env, "ADVISOR_LLM_MAX_TOKENS")?
                .or(fc.llm.max_tokens)
                .unwrap_or(150),
            temperature: parse_env(&env, "ADVISOR_LLM_TEMPERATURE")?
                .or(fc.llm.temperature)
                .unwrap_or(0.7),
            base_url: env("ADVISOR_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        };

        // Voice (env > toml > provider default)
        let stt_provider: SttProvider = env("ADVISOR_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map_or(Ok(SttProvider::Deepgram), |s| s.parse())?;
        let tts_provider: TtsProvider = env("ADVISOR_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map_or(Ok(TtsProvider::OpenAI), |s| s.parse())?;

        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("ADVISOR_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| match stt_provider {
                    SttProvider::Deepgram => "nova-2".to_string(),
                    SttProvider::Whisper => "whisper-1".to_string(),
                }),
            tts_provider,
            tts_model: env("ADVISOR_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| match tts_provider {
                    TtsProvider::OpenAI => "tts-1".to_string(),
                    TtsProvider::ElevenLabs => "eleven_monolingual_v1".to_string(),
                }),
            tts_voice: env("ADVISOR_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| match tts_provider {
                    TtsProvider::OpenAI => "alloy".to_string(),
                    TtsProvider::ElevenLabs => "21m00Tcm4TlvDq8ikWAM".to_string(),
                }),
            tts_speed: parse_env(&env, "ADVISOR_TTS_SPEED")?
                .or(fc.voice.tts_speed)
                .unwrap_or(1.0),
        };

        let call = CallConfig {
            max_turns: fc.call.max_turns.unwrap_or(MAX_TURNS),
            capture: CaptureOptions {
                max_duration: fc
                    .call
                    .max_capture_secs
                    .map_or(MAX_CAPTURE, Duration::from_secs),
                max_silence: fc
                    .call
                    .max_silence_secs
                    .map_or(MAX_SILENCE, Duration::from_secs),
                terminate_on: fc.call.terminate_on.unwrap_or_else(|| "#".to_string()),
            },
            step_timeout: parse_env(&env, "ADVISOR_STEP_TIMEOUT_SECS")?
                .or(fc.call.step_timeout_secs)
                .map_or(STEP_TIMEOUT, Duration::from_secs),
            shutdown_grace: parse_env(&env, "ADVISOR_SHUTDOWN_GRACE_SECS")?
                .or(fc.call.shutdown_grace_secs)
                .map_or(DEFAULT_GRACE, Duration::from_secs),
        };

        let backend: LeadBackend = env("ADVISOR_LEADS_BACKEND")
            .or(fc.leads.backend)
            .map_or(Ok(LeadBackend::Sqlite), |s| s.parse())?;
        let leads = LeadsConfig {
            backend,
            path: fc.leads.path.map_or_else(
                || match backend {
                    LeadBackend::Sqlite => data_dir.join("advisor.db"),
                    LeadBackend::Jsonl => data_dir.join("leads.jsonl"),
                },
                PathBuf::from,
            ),
        };

        let port = parse_env(&env, "ADVISOR_PORT")?
            .or(fc.server.port)
            .unwrap_or(DEFAULT_PORT);

        Ok(Self {
            ari,
            api_keys,
            llm,
            voice,
            call,
            leads,
            data_dir,
            port,
        })
    }

    /// Check that every credential the configured providers need is present
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first missing or invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.ari.password.is_none() {
            return Err(Error::Config("ARI_PASSWORD is required".to_string()));
        }
        url::Url::parse(&self.ari.url)
            .map_err(|e| Error::Config(format!("invalid ARI_URL {}: {e}", self.ari.url)))?;

        if self.api_keys.openai.is_none() {
            return Err(Error::Config("OPENAI_API_KEY is required".to_string()));
        }
        if self.voice.stt_provider == SttProvider::Deepgram && self.api_keys.deepgram.is_none() {
            return Err(Error::Config(
                "DEEPGRAM_API_KEY is required for Deepgram transcription".to_string(),
            ));
        }
        if self.voice.tts_provider == TtsProvider::ElevenLabs && self.api_keys.elevenlabs.is_none()
        {
            return Err(Error::Config(
                "ELEVENLABS_API_KEY is required for ElevenLabs speech".to_string(),
            ));
        }
        if self.call.step_timeout.is_zero() {
            return Err(Error::Config("step timeout must be at least 1 second".to_string()));
        }
        if self.call.max_turns == 0 {
            return Err(Error::Config("max_turns must be at least 1".to_string()));
        }

        Ok(())
    }

    /// ARI client settings
    ///
    /// # Errors
    ///
    /// Returns error if the ARI password is missing
    pub fn ari_config(&self) -> Result<AriConfig> {
        let password = self
            .ari
            .password
            .as_ref()
            .ok_or_else(|| Error::Config("ARI_PASSWORD is required".to_string()))?;

        Ok(AriConfig {
            base_url: self.ari.url.clone(),
            username: self.ari.username.clone(),
            password: SecretString::from(password.expose_secret().to_string()),
            app: self.ari.app.clone(),
            sound_dir: self.ari.sound_dir.clone(),
        })
    }
}

/// Data directory (`~/.local/share/advisor` on Linux)
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("advisor"))
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}")))
        })
        .transpose()
}
