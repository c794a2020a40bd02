//! What the presentation layer can observe: a full state snapshot (watch) and a
//! stream of discrete events (broadcast).

use crate::conversation::ConversationTurn;
use crate::phase::SessionPhase;
use serde::{Deserialize, Serialize};

/// Coordinator state as last published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// Live cumulative transcript of the current utterance.
    pub partial_transcript: String,
    /// Last settled utterance text.
    pub final_transcript: String,
    /// Reply text received so far for the current generation (or the delivered reply).
    pub streaming_reply: String,
    /// Last surfaced error, until cleared or reset.
    pub error: Option<String>,
    pub conversation: Vec<ConversationTurn>,
    pub intensity: u8,
    /// Set when the last generation was cancelled before completing.
    pub generation_aborted: bool,
    /// A generation is scheduled or in flight.
    pub reply_pending: bool,
    pub cache_entries: usize,
}

impl SessionSnapshot {
    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.conversation.last()
    }
}

/// Discrete things that happened, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    PartialTranscript {
        text: String,
    },
    FinalTranscript {
        text: String,
    },
    /// The trigger fired; a generation request is waiting out the debounce.
    GenerationScheduled {
        text: String,
    },
    GenerationStarted {
        generation_id: u64,
        cached: bool,
    },
    ReplyFragment {
        generation_id: u64,
        text: String,
    },
    GenerationCancelled {
        generation_id: u64,
    },
    TurnAppended {
        turn: ConversationTurn,
    },
    IntensityChanged {
        intensity: u8,
    },
    Error {
        message: String,
    },
    Reset,
}
