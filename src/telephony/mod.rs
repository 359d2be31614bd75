//! Telephony control and inbound call events
//!
//! The conversation core only talks to the phone network through the
//! [`Telephony`] trait. [`ari`] implements it against Asterisk ARI and
//! [`events`] turns the ARI WebSocket feed into [`TelephonyEvent`]s.

pub mod ari;
pub mod events;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::call::CallId;

pub use ari::{AriClient, AriConfig};
pub use events::AriEventStream;

/// Hard cap on a single caller recording
pub const MAX_CAPTURE: Duration = Duration::from_secs(30);

/// Continuous silence that ends a recording early
pub const MAX_SILENCE: Duration = Duration::from_secs(3);

/// Bounds for one caller recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Maximum recording length
    pub max_duration: Duration,
    /// Silence that terminates the recording early
    pub max_silence: Duration,
    /// DTMF key that terminates the recording (e.g. `#`)
    pub terminate_on: String,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_duration: MAX_CAPTURE,
            max_silence: MAX_SILENCE,
            terminate_on: "#".to_string(),
        }
    }
}

/// Finished caller recording
#[derive(Debug, Clone)]
pub struct Recording {
    /// Recording name on the telephony side
    pub name: String,
    /// WAV audio bytes
    pub audio: Vec<u8>,
}

/// Control surface of the telephony layer
#[async_trait]
pub trait Telephony: Send + Sync {
    /// Answer an inbound channel
    async fn answer(&self, call_id: &CallId) -> Result<()>;

    /// Record the caller until silence, the terminator key, or the cap
    async fn capture(&self, call_id: &CallId, options: &CaptureOptions) -> Result<Recording>;

    /// Play audio on the channel and wait for it to finish
    async fn play(&self, call_id: &CallId, audio: &[u8]) -> Result<()>;

    /// Hang up the channel
    async fn teardown(&self, call_id: &CallId) -> Result<()>;
}

/// What happened on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A new inbound call entered the application
    CallStarted,
    /// The channel left the application (hangup)
    CallEnded,
    /// In-call signal such as a DTMF digit
    Signal(String),
    /// Anything the dispatcher does not handle
    Other(String),
}

/// Inbound telephony event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelephonyEvent {
    pub call_id: CallId,
    /// Caller number as reported by the network
    pub caller: String,
    pub kind: EventKind,
}

impl TelephonyEvent {
    #[must_use]
    pub fn new(call_id: impl Into<CallId>, caller: impl Into<String>, kind: EventKind) -> Self {
        Self {
            call_id: call_id.into(),
            caller: caller.into(),
            kind,
        }
    }
}
