//! Text generation collaborator

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::call::{Role, Transcript};

pub use openai::ChatClient;

/// One chat message in provider wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn from_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.chat_role().to_string(),
            content: content.into(),
        }
    }
}

/// Build the message list for one reply: system framing, then the whole
/// transcript in order
#[must_use]
pub fn conversation(system_prompt: &str, transcript: &Transcript) -> Vec<ChatMessage> {
    std::iter::once(ChatMessage::system(system_prompt))
        .chain(
            transcript
                .entries()
                .iter()
                .map(|u| ChatMessage::from_role(u.role(), u.text())),
        )
        .collect()
}

/// Produces the assistant's next reply
#[async_trait]
pub trait Responder: Send + Sync {
    /// Complete the conversation with one reply
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}
