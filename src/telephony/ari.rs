//! Asterisk REST Interface (ARI) client
//!
//! Commands go over HTTP with basic auth. Recording and playback completion
//! arrive asynchronously on the event WebSocket, so each in-flight operation
//! parks a oneshot sender here until [`AriEventStream`](super::AriEventStream)
//! resolves it.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::oneshot;
use url::Url;
use uuid::Uuid;

use super::{CaptureOptions, Recording, Telephony};
use crate::call::CallId;
use crate::{Error, Result};

/// Extra time past the recording cap before giving up on the finish event
const RECORDING_SLACK: Duration = Duration::from_secs(5);

/// Limit on a single ARI REST request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Upper bound on waiting for a playback to finish
const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for ARI
#[derive(Debug, Clone)]
pub struct AriConfig {
    /// Base HTTP URL of the Asterisk server (e.g. `http://localhost:8088`)
    pub base_url: String,
    pub username: String,
    pub password: SecretString,
    /// Stasis application name
    pub app: String,
    /// Directory readable by Asterisk where playback files are staged
    pub sound_dir: PathBuf,
}

/// Outcome of an asynchronous ARI operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Finished,
    Failed(String),
}

#[derive(Default)]
struct PendingOps {
    recordings: HashMap<String, oneshot::Sender<Completion>>,
    playbacks: HashMap<String, oneshot::Sender<Completion>>,
}

/// Asterisk ARI telephony client
pub struct AriClient {
    client: reqwest::Client,
    config: AriConfig,
    base: Url,
    pending: Mutex<PendingOps>,
}

impl AriClient {
    /// Create a new ARI client
    ///
    /// # Errors
    ///
    /// Returns error if the base URL cannot be parsed or the HTTP client
    /// cannot be built
    pub fn new(config: AriConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid ARI URL {}: {e}", config.base_url)))?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            config,
            base,
            pending: Mutex::new(PendingOps::default()),
        })
    }

    /// Stasis application name
    #[must_use]
    pub fn app(&self) -> &str {
        &self.config.app
    }

    /// Verify credentials and reachability
    ///
    /// # Errors
    ///
    /// Returns error if Asterisk rejects the request or is unreachable
    pub async fn ping(&self) -> Result<()> {
        self.request(Method::GET, "/asterisk/info", &[]).await?;
        tracing::info!(url = %self.base, app = %self.config.app, "ARI reachable");
        Ok(())
    }

    /// WebSocket URL of the application's event feed
    ///
    /// # Errors
    ///
    /// Returns error if the base URL scheme is not http(s)
    pub fn events_url(&self) -> Result<Url> {
        let mut url = self
            .base
            .join("/ari/events")
            .map_err(|e| Error::Config(format!("invalid ARI events URL: {e}")))?;
        let scheme = match self.base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(Error::Config(format!("unsupported ARI scheme: {other}")));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::Config("failed to set WebSocket scheme".to_string()))?;

        let api_key = format!(
            "{}:{}",
            self.config.username,
            self.config.password.expose_secret()
        );
        url.query_pairs_mut()
            .append_pair("app", &self.config.app)
            .append_pair("api_key", &api_key);

        Ok(url)
    }

    /// Resolve a parked recording; returns false if nobody was waiting
    pub fn resolve_recording(&self, name: &str, completion: Completion) -> bool {
        let tx = self.pending_ops().recordings.remove(name);
        tx.is_some_and(|tx| tx.send(completion).is_ok())
    }

    /// Resolve a parked playback; returns false if nobody was waiting
    pub fn resolve_playback(&self, playback_id: &str, completion: Completion) -> bool {
        let tx = self.pending_ops().playbacks.remove(playback_id);
        tx.is_some_and(|tx| tx.send(completion).is_ok())
    }

    /// Fail every parked operation (event stream lost or shutting down)
    pub fn fail_pending(&self, reason: &str) {
        let mut guard = self.pending_ops();
        let pending = &mut *guard;
        for (_, tx) in pending.recordings.drain().chain(pending.playbacks.drain()) {
            let _ = tx.send(Completion::Failed(reason.to_string()));
        }
    }

    fn pending_ops(&self) -> std::sync::MutexGuard<'_, PendingOps> {
        self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Send a request, failing only when Asterisk cannot be reached
    async fn send(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let url = format!("{}/ari{path}", self.base.as_str().trim_end_matches('/'));

        self.client
            .request(method.clone(), &url)
            .basic_auth(
                &self.config.username,
                Some(self.config.password.expose_secret()),
            )
            .query(query)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, %method, path, "ARI request failed");
                Error::Telephony(format!("ARI {method} {path}: {e}"))
            })
    }

    /// Send a request that must succeed
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let response = self.send(&method, path, query).await?;
        ensure_success(&method, path, response).await
    }

    /// Download a stored recording, then delete it whether or not the
    /// download worked
    async fn fetch_recording(&self, name: &str) -> Result<Vec<u8>> {
        let audio = match self
            .request(Method::GET, &format!("/recordings/stored/{name}/file"), &[])
            .await
        {
            Ok(response) => response.bytes().await.map(|b| b.to_vec()).map_err(Error::from),
            Err(e) => Err(e),
        };

        if let Err(e) = self
            .request(Method::DELETE, &format!("/recordings/stored/{name}"), &[])
            .await
        {
            tracing::warn!(recording = %name, error = %e, "failed to delete stored recording");
        }

        audio
    }

    /// Wait for a parked operation, dropping its slot on timeout
    async fn await_completion(
        &self,
        rx: oneshot::Receiver<Completion>,
        limit: Duration,
        what: &str,
    ) -> Result<()> {
        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(Completion::Finished)) => Ok(()),
            Ok(Ok(Completion::Failed(cause))) => {
                Err(Error::Telephony(format!("{what} failed: {cause}")))
            }
            Ok(Err(_)) => Err(Error::Telephony(format!("{what} waiter dropped"))),
            Err(_) => Err(Error::Telephony(format!(
                "{what} did not finish within {}s",
                limit.as_secs()
            ))),
        }
    }

    /// Write audio into a temp file Asterisk can read
    ///
    /// The file is removed when the returned handle drops.
    fn stage_audio(&self, audio: &[u8]) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("advisor-")
            .suffix(".wav")
            .tempfile_in(&self.config.sound_dir)?;
        file.write_all(audio)?;
        file.flush()?;
        Ok(file)
    }
}

async fn ensure_success(
    method: &Method,
    path: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, %method, path, body = %body, "ARI error response");
    Err(Error::Telephony(format!(
        "ARI {method} {path} returned {status}: {body}"
    )))
}

/// Asterisk `sound:` URIs name files without their extension
fn sound_uri(path: &std::path::Path) -> String {
    format!("sound:{}", path.with_extension("").display())
}

#[async_trait]
impl Telephony for AriClient {
    async fn answer(&self, call_id: &CallId) -> Result<()> {
        self.request(Method::POST, &format!("/channels/{call_id}/answer"), &[])
            .await?;
        tracing::debug!(%call_id, "channel answered");
        Ok(())
    }

    async fn capture(&self, call_id: &CallId, options: &CaptureOptions) -> Result<Recording> {
        let name = format!("advisor-{call_id}-{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.pending_ops().recordings.insert(name.clone(), tx);

        let query = [
            ("name", name.clone()),
            ("format", "wav".to_string()),
            (
                "maxDurationSeconds",
                options.max_duration.as_secs().to_string(),
            ),
            ("maxSilenceSeconds", options.max_silence.as_secs().to_string()),
            ("ifExists", "overwrite".to_string()),
            ("beep", "false".to_string()),
            ("terminateOn", options.terminate_on.clone()),
        ];

        if let Err(e) = self
            .request(Method::POST, &format!("/channels/{call_id}/record"), &query)
            .await
        {
            self.pending_ops().recordings.remove(&name);
            return Err(e);
        }
        tracing::debug!(%call_id, recording = %name, "recording started");

        let limit = options.max_duration + RECORDING_SLACK;
        if let Err(e) = self.await_completion(rx, limit, "recording").await {
            self.pending_ops().recordings.remove(&name);
            // Stopping a live recording stores whatever was captured so far
            let stopped = self
                .request(Method::POST, &format!("/recordings/live/{name}/stop"), &[])
                .await;
            if stopped.is_err() {
                return Err(e);
            }
            tracing::warn!(%call_id, recording = %name, error = %e, "recording force-stopped");
        }

        let audio = self.fetch_recording(&name).await?;
        tracing::debug!(%call_id, recording = %name, bytes = audio.len(), "recording fetched");
        Ok(Recording { name, audio })
    }

    async fn play(&self, call_id: &CallId, audio: &[u8]) -> Result<()> {
        let staged = self.stage_audio(audio)?;
        let playback_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_ops().playbacks.insert(playback_id.clone(), tx);

        let query = [("media", sound_uri(staged.path()))];
        if let Err(e) = self
            .request(
                Method::POST,
                &format!("/channels/{call_id}/play/{playback_id}"),
                &query,
            )
            .await
        {
            self.pending_ops().playbacks.remove(&playback_id);
            return Err(e);
        }
        tracing::debug!(%call_id, playback = %playback_id, bytes = audio.len(), "playback started");

        let result = self.await_completion(rx, PLAYBACK_TIMEOUT, "playback").await;
        if result.is_err() {
            self.pending_ops().playbacks.remove(&playback_id);
        }
        drop(staged);
        result
    }

    async fn teardown(&self, call_id: &CallId) -> Result<()> {
        let path = format!("/channels/{call_id}");
        let response = self.send(&Method::DELETE, &path, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(%call_id, "channel already gone");
            return Ok(());
        }
        ensure_success(&Method::DELETE, &path, response).await?;
        tracing::debug!(%call_id, "channel hung up");
        Ok(())
    }
}
