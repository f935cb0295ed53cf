use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{ChatTurn, Role};

pub const SYSTEM_INSTRUCTION: &str =
    "You are a friendly design assistant. Answer briefly, in English.";

const WELCOME_TEXT: &str =
    "Hi! Upload an image and ask me anything about colors, styles or composition.";

const FAILURE_TEXT: &str =
    "Sorry, I couldn't answer that right now. Please try again in a moment.";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Entries the remote protocol never produced (the welcome seed and
    /// failure notices). Excluded when building outbound history.
    pub synthetic: bool,
}

/// Append-only message log. Writes happen in two phases per turn: the
/// user message goes in before the remote call, and either the reply or
/// a synthetic failure notice lands afterwards, so a sent message is
/// never left without a visible response.
#[derive(Debug)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    next_id: u64,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatLog {
    pub fn new() -> Self {
        let mut log = Self {
            messages: Vec::new(),
            next_id: 0,
        };
        log.push(Role::Model, WELCOME_TEXT, true);
        log
    }

    fn push(&mut self, role: Role, text: &str, synthetic: bool) {
        let message = ChatMessage {
            id: self.next_id,
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
            synthetic,
        };
        self.next_id += 1;
        self.messages.push(message);
    }

    pub fn push_user(&mut self, text: &str) {
        self.push(Role::User, text, false)
    }

    pub fn push_model(&mut self, text: &str) {
        self.push(Role::Model, text, false)
    }

    pub fn push_failure(&mut self) {
        self.push(Role::Model, FAILURE_TEXT, true)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Chronological history for the remote call. Synthetic entries are
    /// dropped; the remote protocol rejects a conversation opened by a
    /// `model` turn it never produced.
    pub fn outbound_history(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter(|m| !m.synthetic)
            .map(|m| ChatTurn {
                role: m.role,
                text: m.text.clone(),
            })
            .collect()
    }
}
