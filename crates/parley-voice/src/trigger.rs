//! Trigger policy: when has the trainee said enough to start drafting a reply?

/// Fires at most once per utterance, the first time the trimmed partial
/// transcript grows past `threshold_chars` characters.
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    threshold_chars: usize,
    triggered: bool,
}

impl TriggerPolicy {
    pub fn new(threshold_chars: usize) -> Self {
        Self {
            threshold_chars,
            triggered: false,
        }
    }

    /// Feed the latest cumulative partial text. Returns `true` exactly once per utterance.
    pub fn observe(&mut self, partial: &str) -> bool {
        if self.triggered {
            return false;
        }
        if partial.trim().chars().count() > self.threshold_chars {
            self.triggered = true;
            return true;
        }
        false
    }

    /// Re-arm for a new utterance.
    pub fn reset(&mut self) {
        self.triggered = false;
    }

    pub fn has_triggered(&self) -> bool {
        self.triggered
    }
}
