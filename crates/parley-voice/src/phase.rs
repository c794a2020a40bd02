//! Top-level session phase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The coordinator's top-level state. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Recording; a reply may already be generating underneath.
    Listening,
    /// Utterance ended, reply still generating.
    Thinking,
    /// Reply handed to speech output.
    Speaking,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Listening => "listening",
            SessionPhase::Thinking => "thinking",
            SessionPhase::Speaking => "speaking",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionPhase::Idle)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
