//! ARI WebSocket event feed
//!
//! Call lifecycle events are forwarded to the dispatcher. Recording and
//! playback completions are handed back to the [`AriClient`] that is
//! waiting on them. The connection is re-established with backoff until
//! the stop signal flips.

use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use super::ari::{AriClient, Completion};
use super::{EventKind, TelephonyEvent};
use crate::Result;
use crate::retry::{RetryPolicy, delay_for_attempt};

/// Caller number used when the network does not report one
const UNKNOWN_CALLER: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<AriChannel>,
    digit: Option<String>,
    recording: Option<AriRecording>,
    playback: Option<AriPlayback>,
}

#[derive(Debug, Deserialize)]
struct AriChannel {
    id: String,
    #[serde(default)]
    caller: AriCaller,
}

#[derive(Debug, Default, Deserialize)]
struct AriCaller {
    #[serde(default)]
    number: String,
}

#[derive(Debug, Deserialize)]
struct AriRecording {
    name: String,
    cause: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AriPlayback {
    id: String,
    state: Option<String>,
}

/// A decoded ARI event
#[derive(Debug, PartialEq, Eq)]
pub enum AriMessage {
    /// Channel-level event for the dispatcher
    Call(TelephonyEvent),
    /// A recording finished or failed
    Recording { name: String, completion: Completion },
    /// A playback finished or failed
    Playback { id: String, completion: Completion },
}

/// Decode one ARI event payload
///
/// # Errors
///
/// Returns error if the payload is not JSON or lacks the fields its type
/// needs. Call lifecycle and DTMF events need a channel with an id.
pub fn parse_event(raw: &str) -> Result<AriMessage> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    let type_name = envelope.kind.as_str();
    let channel = envelope.channel.filter(|c| !c.id.is_empty());
    let call_event = |kind: EventKind| -> Result<AriMessage> {
        let Some(AriChannel { id, caller }) = channel else {
            if matches!(kind, EventKind::Other(_)) {
                return Ok(AriMessage::Call(TelephonyEvent::new(
                    String::new(),
                    UNKNOWN_CALLER,
                    kind,
                )));
            }
            return Err(crate::Error::Telephony(format!("{type_name} without channel")));
        };
        let caller = if caller.number.is_empty() {
            UNKNOWN_CALLER.to_string()
        } else {
            caller.number
        };
        Ok(AriMessage::Call(TelephonyEvent::new(id, caller, kind)))
    };

    let message = match type_name {
        "StasisStart" => call_event(EventKind::CallStarted)?,
        "StasisEnd" => call_event(EventKind::CallEnded)?,
        "ChannelDtmfReceived" => {
            call_event(EventKind::Signal(envelope.digit.unwrap_or_default()))?
        }
        kind @ ("RecordingFinished" | "RecordingFailed") => {
            let Some(recording) = envelope.recording else {
                return Err(crate::Error::Telephony(format!("{kind} without recording")));
            };
            let completion = if kind == "RecordingFinished" {
                Completion::Finished
            } else {
                Completion::Failed(recording.cause.unwrap_or_else(|| "unknown".to_string()))
            };
            AriMessage::Recording {
                name: recording.name,
                completion,
            }
        }
        "PlaybackFinished" => {
            let Some(playback) = envelope.playback else {
                return Err(crate::Error::Telephony(
                    "PlaybackFinished without playback".to_string(),
                ));
            };
            let completion = match playback.state.as_deref() {
                Some("failed") => Completion::Failed("playback failed".to_string()),
                _ => Completion::Finished,
            };
            AriMessage::Playback {
                id: playback.id,
                completion,
            }
        }
        other => call_event(EventKind::Other(other.to_string()))?,
    };

    Ok(message)
}

/// Long-running reader of the ARI event WebSocket
pub struct AriEventStream {
    ari: Arc<AriClient>,
    policy: RetryPolicy,
}

impl AriEventStream {
    #[must_use]
    pub const fn new(ari: Arc<AriClient>, policy: RetryPolicy) -> Self {
        Self { ari, policy }
    }

    /// Forward events until `stop` is set or the dispatcher goes away
    ///
    /// # Errors
    ///
    /// Returns error if the events URL cannot be built
    pub async fn run(
        self,
        events: mpsc::Sender<TelephonyEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let url = self.ari.events_url()?;
        let mut attempt: u32 = 0;

        while !*stop.borrow() && !events.is_closed() {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    tracing::info!(app = %self.ari.app(), "connected to ARI event stream");
                    attempt = 0;
                    self.pump(ws, &events, &mut stop).await;
                    self.ari.fail_pending("ARI event stream disconnected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "ARI event stream connect failed");
                }
            }

            if *stop.borrow() || events.is_closed() {
                break;
            }

            let delay = delay_for_attempt(&self.policy, attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = stop.changed() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("ARI event stream stopped");
        Ok(())
    }

    async fn pump<S>(
        &self,
        mut ws: S,
        events: &mpsc::Sender<TelephonyEvent>,
        stop: &mut watch::Receiver<bool>,
    ) where
        S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => self.route(text.as_str(), events).await,
                    Some(Ok(Message::Close(frame))) => {
                        tracing::warn!(?frame, "ARI event stream closed by server");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "ARI event stream error");
                        return;
                    }
                    None => {
                        tracing::warn!("ARI event stream ended");
                        return;
                    }
                },
            }
        }
    }

    async fn route(&self, raw: &str, events: &mpsc::Sender<TelephonyEvent>) {
        match parse_event(raw) {
            Ok(AriMessage::Call(event)) => {
                if events.send(event).await.is_err() {
                    tracing::debug!("dispatcher gone, dropping event");
                }
            }
            Ok(AriMessage::Recording { name, completion }) => {
                if !self.ari.resolve_recording(&name, completion) {
                    tracing::debug!(recording = %name, "no waiter for recording");
                }
            }
            Ok(AriMessage::Playback { id, completion }) => {
                if !self.ari.resolve_playback(&id, completion) {
                    tracing::debug!(playback = %id, "no waiter for playback");
                }
            }
            Err(e) => tracing::debug!(error = %e, "skipping undecodable ARI event"),
        }
    }
}
