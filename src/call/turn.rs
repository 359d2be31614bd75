//! One conversation turn: listen, transcribe, respond, speak, decide

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{CallId, CallSession, Role};
use crate::lead::LeadRecord;
use crate::llm::{self, Responder};
use crate::script;
use crate::telephony::{CaptureOptions, Telephony};
use crate::voice::{self, Synthesizer, Transcriber};
use crate::{Error, Result};

/// Completed exchanges after which the call is closed regardless of outcome
pub const MAX_TURNS: u32 = 10;

/// Default limit on one transcription, reply, or synthesis request
pub const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on playing one prompt to the caller
const PLAYBACK_LIMIT: Duration = Duration::from_secs(180);

/// External services a call talks to
#[derive(Clone)]
pub struct Collaborators {
    pub telephony: Arc<dyn Telephony>,
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Why a conversation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Interest, amount, and risk tolerance are all known
    Qualified,
    /// The exchange ceiling was reached
    TurnLimit,
    /// Too many listens produced no usable speech
    NoInputLimit,
    /// The responder could not produce a reply
    GenerationFailed,
    /// The caller hung up
    HungUp,
    /// The process is shutting down
    Shutdown,
    /// Unexpected error inside the call
    Failed,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qualified => "qualified",
            Self::TurnLimit => "turn_limit",
            Self::NoInputLimit => "no_input_limit",
            Self::GenerationFailed => "generation_failed",
            Self::HungUp => "hung_up",
            Self::Shutdown => "shutdown",
            Self::Failed => "failed",
        }
    }

    /// Stops that always close with the not-qualified script
    #[must_use]
    pub const fn is_forced(self) -> bool {
        matches!(self, Self::GenerationFailed | Self::Shutdown | Self::Failed)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Continue,
    Stop(StopReason),
}

/// Drives turns for any number of calls
///
/// Holds no per-call state, so one controller is shared by every session.
pub struct TurnController {
    collaborators: Collaborators,
    capture: CaptureOptions,
    max_turns: u32,
    step_timeout: Duration,
    system_prompt: String,
}

impl TurnController {
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            capture: CaptureOptions::default(),
            max_turns: MAX_TURNS,
            step_timeout: STEP_TIMEOUT,
            system_prompt: script::SYSTEM_PROMPT.to_string(),
        }
    }

    #[must_use]
    pub fn with_capture(mut self, capture: CaptureOptions) -> Self {
        self.capture = capture;
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Limit each collaborator request; a capture also gets its recording cap
    #[must_use]
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    #[must_use]
    pub fn telephony(&self) -> &Arc<dyn Telephony> {
        &self.collaborators.telephony
    }

    #[must_use]
    pub const fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Run one exchange on the session
    ///
    /// Collaborator failures never escape: a failed or empty listen counts
    /// as no input, a failed reply stops the call, and failed speech is
    /// logged and skipped. A collaborator that outlives its time limit has
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns error only for faults that are not collaborator failures
    pub async fn run_turn(&self, session: &mut CallSession) -> Result<TurnOutcome> {
        if let Some(reason) = session.interruption() {
            return Ok(TurnOutcome::Stop(reason));
        }

        let Some(text) = self.listen(session.id()).await? else {
            let misses = session.note_no_input();
            if misses >= self.max_turns {
                tracing::info!(call_id = %session.id(), misses, "no caller input, giving up");
                return Ok(TurnOutcome::Stop(StopReason::NoInputLimit));
            }
            return Ok(TurnOutcome::Continue);
        };

        if let Some(reason) = session.interruption() {
            return Ok(TurnOutcome::Stop(reason));
        }

        tracing::info!(call_id = %session.id(), caller_said = %text, "caller utterance");
        session.record(Role::Caller, &text);

        let messages = llm::conversation(&self.system_prompt, session.transcript());
        let reply = match bounded(
            self.step_timeout,
            self.collaborators.responder.complete(&messages),
            Error::Llm,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(call_id = %session.id(), error = %e, "reply generation failed");
                return Ok(TurnOutcome::Stop(StopReason::GenerationFailed));
            }
        };

        session.update_lead(&text);
        session.record(Role::Assistant, &reply);

        let interrupted = session.interruption();
        if interrupted.is_none() {
            self.speak(session.id(), &reply).await;
        }
        let turns = session.complete_turn();

        tracing::debug!(
            call_id = %session.id(),
            turns,
            qualified = session.lead().is_qualified(),
            "turn complete"
        );

        if let Some(reason) = interrupted {
            return Ok(TurnOutcome::Stop(reason));
        }
        Ok(self.decide(session.lead(), turns))
    }

    /// Continue while the lead is unqualified and turns remain
    #[must_use]
    pub fn decide(&self, lead: &LeadRecord, turn_count: u32) -> TurnOutcome {
        if lead.is_qualified() {
            TurnOutcome::Stop(StopReason::Qualified)
        } else if turn_count >= self.max_turns {
            TurnOutcome::Stop(StopReason::TurnLimit)
        } else {
            TurnOutcome::Continue
        }
    }

    /// Synthesize and play text on the call
    ///
    /// Returns false if either step failed. Failures are logged only.
    pub async fn speak(&self, call_id: &CallId, text: &str) -> bool {
        let audio = match bounded(
            self.step_timeout,
            self.collaborators.synthesizer.synthesize(text),
            Error::Tts,
        )
        .await
        {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "speech synthesis failed");
                return false;
            }
        };

        let playback = bounded(
            PLAYBACK_LIMIT,
            self.collaborators.telephony.play(call_id, &audio),
            Error::Telephony,
        );
        match playback.await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "playback failed");
                false
            }
        }
    }

    /// Capture and transcribe one caller utterance
    ///
    /// `None` means no usable speech.
    async fn listen(&self, call_id: &CallId) -> Result<Option<String>> {
        let recording = match bounded(
            self.capture.max_duration + self.step_timeout,
            self.collaborators.telephony.capture(call_id, &self.capture),
            Error::Telephony,
        )
        .await
        {
            Ok(recording) => recording,
            Err(e) if e.is_transient() => {
                tracing::warn!(call_id = %call_id, error = %e, "capture failed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if voice::is_too_short(&recording.audio) {
            tracing::debug!(call_id = %call_id, recording = %recording.name, "recording too short");
            return Ok(None);
        }

        match bounded(
            self.step_timeout,
            self.collaborators.transcriber.transcribe(&recording.audio),
            Error::Stt,
        )
        .await
        {
            Ok(text) => {
                let text = text.trim();
                Ok((!text.is_empty()).then(|| text.to_string()))
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(call_id = %call_id, error = %e, "transcription failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Run a collaborator request, failing it with `kind` once `limit` passes
async fn bounded<T>(
    limit: Duration,
    request: impl Future<Output = Result<T>>,
    kind: fn(String) -> Error,
) -> Result<T> {
    tokio::time::timeout(limit, request)
        .await
        .unwrap_or_else(|_| Err(kind(format!("no response within {limit:?}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stalled_request_becomes_collaborator_error() {
        let err = bounded(
            Duration::from_millis(20),
            std::future::pending::<Result<()>>(),
            Error::Stt,
        )
        .await
        .unwrap_err();

        assert!(err.is_transient());
        assert!(matches!(err, Error::Stt(msg) if msg.contains("no response")));
    }

    #[tokio::test]
    async fn prompt_request_passes_through() {
        let value = bounded(Duration::from_secs(1), async { Ok(7) }, Error::Llm)
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn forced_stops_use_fail_safe_closing() {
        assert!(StopReason::GenerationFailed.is_forced());
        assert!(StopReason::Shutdown.is_forced());
        assert!(StopReason::Failed.is_forced());
        assert!(!StopReason::Qualified.is_forced());
        assert!(!StopReason::TurnLimit.is_forced());
        assert!(!StopReason::HungUp.is_forced());
    }

    #[test]
    fn stop_reason_names() {
        assert_eq!(StopReason::NoInputLimit.to_string(), "no_input_limit");
        assert_eq!(
            serde_json::to_string(&StopReason::GenerationFailed).unwrap(),
            "\"generation_failed\""
        );
    }
}
