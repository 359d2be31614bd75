//! Ordered conversation transcript for a single call

use serde::Serialize;

/// Who spoke an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Assistant,
}

impl Role {
    /// Chat-completion role name for this speaker
    #[must_use]
    pub const fn chat_role(self) -> &'static str {
        match self {
            Self::Caller => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One recorded turn of speech
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utterance {
    role: Role,
    text: String,
}

impl Utterance {
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Append-only list of utterances in conversation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    entries: Vec<Utterance>,
}

impl Transcript {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record an utterance at the end of the conversation
    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.entries.push(Utterance {
            role,
            text: text.into(),
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
