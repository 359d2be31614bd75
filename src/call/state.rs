//! Call lifecycle states

use std::fmt;

use serde::Serialize;

use crate::{Error, Result};

/// Lifecycle of one call session
///
/// `Created → Greeting → Conversing → Closing → Ended`. Any live state may
/// jump to `Closing` (fail-safe close) or straight to `Ended` (caller hung
/// up or the greeting never went out). `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Created,
    Greeting,
    Conversing,
    Closing,
    Ended,
}

impl CallState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Greeting => "greeting",
            Self::Conversing => "conversing",
            Self::Closing => "closing",
            Self::Ended => "ended",
        }
    }

    /// Whether moving from `self` to `next` is allowed
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Greeting)
                | (Self::Greeting, Self::Conversing)
                | (Self::Created | Self::Greeting | Self::Conversing, Self::Closing)
                | (
                    Self::Created | Self::Greeting | Self::Conversing | Self::Closing,
                    Self::Ended
                )
        )
    }

    /// Validate and return the next state
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` for moves the lifecycle forbids
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
