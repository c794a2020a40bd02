//! Conversation log: the ordered record of what the trainee said and what the persona replied.
//!
//! Turns are immutable once created and only ever appended; the whole log is
//! cleared on reset. Insertion order is chronological order, and the log is the only
//! history handed to the generation source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The trainee.
    User,
    /// The simulated persona.
    Agent,
}

impl Speaker {
    /// Chat-completion role for this speaker.
    pub fn role(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Agent => "assistant",
        }
    }
}

/// One logged utterance or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    speaker: Speaker,
    text: String,
    timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Role-tagged history entry as sent to the generation source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl From<&ConversationTurn> for HistoryMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.speaker.role().to_string(),
            content: turn.text.clone(),
        }
    }
}

/// Append-only, chronologically ordered turns.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return it.
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) -> &ConversationTurn {
        self.turns.push(ConversationTurn::new(speaker, text));
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Full history, oldest first.
    pub fn history(&self) -> Vec<HistoryMessage> {
        self.history_until(self.turns.len())
    }

    /// History of the first `len` turns (clamped), oldest first.
    pub fn history_until(&self, len: usize) -> Vec<HistoryMessage> {
        self.turns[..len.min(self.turns.len())]
            .iter()
            .map(HistoryMessage::from)
            .collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
