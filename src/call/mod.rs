//! Per-call conversation engine
//!
//! A [`CallSession`] owns one call's transcript and lead record and walks
//! the call state machine. The [`TurnController`] runs one
//! listen/transcribe/respond/speak exchange at a time. The [`CallRegistry`]
//! is the only structure shared between calls, and the [`EventDispatcher`]
//! routes telephony events into it.

pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod state;
pub mod transcript;
pub mod turn;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use dispatcher::EventDispatcher;
pub use registry::CallRegistry;
pub use session::{CallHandle, CallSession, CallSignal, CallSnapshot, CallSummary};
pub use state::CallState;
pub use transcript::{Role, Transcript, Utterance};
pub use turn::{Collaborators, MAX_TURNS, STEP_TIMEOUT, StopReason, TurnController, TurnOutcome};

/// Opaque identifier of one telephony channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
