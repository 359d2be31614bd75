//! Daemon - the main gateway service
//!
//! Wires telephony, speech, reply generation, and lead storage together,
//! then routes ARI events until interrupted.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};

use crate::api::ApiServer;
use crate::call::{CallRegistry, Collaborators, EventDispatcher, TurnController};
use crate::config::{LeadBackend, LeadsConfig};
use crate::db::{self, LeadRepo};
use crate::leads::{JsonlLeadSink, LeadSink};
use crate::llm::ChatClient;
use crate::retry::RetryPolicy;
use crate::telephony::{AriClient, AriEventStream};
use crate::voice::stt::{SpeechToText, SttProvider};
use crate::voice::tts::{TextToSpeech, TtsProvider};
use crate::{Config, Error, Result};

/// Telephony events buffered between the event stream and the dispatcher
const EVENT_BUFFER: usize = 256;

/// Reply retries stay short so the caller is not left in silence
const REPLY_RETRY: RetryPolicy = RetryPolicy {
    max_retries: 2,
    base_delay: Duration::from_millis(250),
    max_delay: Duration::from_secs(2),
};

/// The advisor daemon - answers calls and qualifies leads
pub struct Daemon {
    config: Config,
    ari: Arc<AriClient>,
    leads: Arc<dyn LeadSink>,
    dispatcher: EventDispatcher,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// Checks that ARI is reachable before returning.
    ///
    /// # Errors
    ///
    /// Returns error if a credential is missing, a client cannot be built,
    /// the lead store cannot be opened, or ARI does not answer
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let ari = Arc::new(AriClient::new(config.ari_config()?)?);
        ari.ping().await?;
        tracing::info!(url = %config.ari.url, app = %ari.app(), "ARI reachable");

        let openai_key = required(config.api_keys.openai.as_ref(), "OPENAI_API_KEY")?;

        let transcriber = match config.voice.stt_provider {
            SttProvider::Deepgram => SpeechToText::new_deepgram(
                required(config.api_keys.deepgram.as_ref(), "DEEPGRAM_API_KEY")?,
                config.voice.stt_model.clone(),
            )?,
            SttProvider::Whisper => {
                SpeechToText::new_whisper(openai_key.clone(), config.voice.stt_model.clone())?
            }
        };

        let synthesizer = match config.voice.tts_provider {
            TtsProvider::OpenAI => TextToSpeech::new_openai(
                openai_key.clone(),
                config.voice.tts_model.clone(),
                config.voice.tts_voice.clone(),
                config.voice.tts_speed,
            )?,
            TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs(
                required(config.api_keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY")?,
                config.voice.tts_model.clone(),
                config.voice.tts_voice.clone(),
            )?,
        };

        let responder = ChatClient::new(
            openai_key,
            config.llm.base_url.clone(),
            config.llm.model.clone(),
            config.llm.max_tokens,
            config.llm.temperature,
        )?
        .with_retry(REPLY_RETRY);

        tracing::info!(
            stt = ?config.voice.stt_provider,
            tts = ?config.voice.tts_provider,
            model = %config.llm.model,
            "speech and reply providers ready"
        );

        let leads = open_lead_sink(&config.leads)?;

        let collaborators = Collaborators {
            telephony: ari.clone(),
            transcriber: Arc::new(transcriber),
            responder: Arc::new(responder),
            synthesizer: Arc::new(synthesizer),
        };
        let turns = TurnController::new(collaborators)
            .with_capture(config.call.capture.clone())
            .with_step_timeout(config.call.step_timeout)
            .with_max_turns(config.call.max_turns);

        let dispatcher = EventDispatcher::new(
            Arc::new(CallRegistry::new()),
            Arc::new(turns),
            Arc::clone(&leads),
            config.call.shutdown_grace,
            RetryPolicy::default(),
        );

        Ok(Self {
            config,
            ari,
            leads,
            dispatcher,
        })
    }

    /// Run the daemon until interrupted
    ///
    /// On Ctrl-C, new calls are refused, active calls get the grace period
    /// to close, and their leads are saved before this returns.
    ///
    /// # Errors
    ///
    /// Returns error if the event stream cannot start
    pub async fn run(self) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);

        let stream = AriEventStream::new(Arc::clone(&self.ari), RetryPolicy::default());
        let stream_task = tokio::spawn(stream.run(events_tx, stop_rx.clone()));

        let api_task = ApiServer::new(
            Arc::clone(self.dispatcher.registry()),
            Arc::clone(&self.leads),
            self.config.port,
        )
        .spawn(stop_rx);

        // Set up shutdown signal
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        tracing::info!(app = %self.ari.app(), port = self.config.port, "advisor gateway ready");

        tokio::select! {
            _ = shutdown_rx.recv() => tracing::info!("shutdown requested"),
            () = self.dispatcher.run(&mut events_rx) => tracing::warn!("event stream ended"),
        }

        // Keep routing events so hang-ups and playback completions still
        // reach calls that are closing
        let draining = async {
            self.dispatcher.run(&mut events_rx).await;
            std::future::pending::<()>().await;
        };
        tokio::select! {
            () = self.dispatcher.shutdown() => {}
            () = draining => {}
        }

        stop_tx.send_replace(true);

        match stream_task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "ARI event stream failed"),
            Err(e) => tracing::error!(error = %e, "ARI event stream task panicked"),
            Ok(Ok(())) => {}
        }
        match api_task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "API server failed"),
            Err(e) => tracing::error!(error = %e, "API server task panicked"),
            Ok(Ok(())) => {}
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Open the configured lead store
///
/// # Errors
///
/// Returns error if the `SQLite` database cannot be opened or migrated
pub fn open_lead_sink(config: &LeadsConfig) -> Result<Arc<dyn LeadSink>> {
    match config.backend {
        LeadBackend::Sqlite => {
            let pool = db::init(&config.path)?;
            tracing::info!(path = %config.path.display(), "lead database initialized");
            Ok(Arc::new(LeadRepo::new(pool)))
        }
        LeadBackend::Jsonl => {
            tracing::info!(path = %config.path.display(), "appending leads to JSON lines file");
            Ok(Arc::new(JsonlLeadSink::new(config.path.clone())))
        }
    }
}

fn required(key: Option<&SecretString>, name: &str) -> Result<SecretString> {
    key.map(|k| SecretString::from(k.expose_secret().to_string()))
        .ok_or_else(|| Error::Config(format!("{name} is required")))
}
