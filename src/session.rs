//! Session history - append-only log of conversation turns

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::llm::Role;

/// A single user or assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Process-lifetime conversation history.
///
/// Turns are only ever appended; nothing is edited or removed.
#[derive(Debug)]
pub struct SessionHistory {
    id: Uuid,
    turns: Vec<ConversationTurn>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into());
    }

    fn push(&mut self, role: Role, content: String) {
        self.turns.push(ConversationTurn {
            role,
            content,
            timestamp: Utc::now(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}
