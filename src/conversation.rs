//! Bounded conversation history

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::emotion::parse_emotion_tag;

/// Default number of retained user/assistant messages
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message in the wire shape the model expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered user/assistant history, oldest first
///
/// The system message is rebuilt from the configured prompt on every request
/// and never counts against the retention bound.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    system_prompt: String,
    max_history: usize,
    messages: VecDeque<Message>,
}

impl ConversationStore {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_history,
            messages: VecDeque::with_capacity(max_history + 1),
        }
    }

    pub fn add_user(&mut self, text: &str) {
        self.push(Message::user(text));
        tracing::debug!(messages = self.messages.len(), "conversation: +user");
    }

    /// Store an assistant reply with any leading emotion tag removed
    pub fn add_assistant(&mut self, text: &str) {
        let (_, clean) = parse_emotion_tag(text);
        self.push(Message::assistant(clean));
    }

    /// System message followed by the retained history, as sent to the model
    #[must_use]
    pub fn messages_for_request(&self) -> Vec<Message> {
        std::iter::once(Message::system(self.system_prompt.clone()))
            .chain(self.messages.iter().cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        tracing::debug!("conversation cleared");
    }

    /// Retained history without the system message
    #[must_use]
    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_history {
            self.messages.pop_front();
        }
    }
}
