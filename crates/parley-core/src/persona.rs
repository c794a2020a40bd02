//! Persona context for the simulated customer.
//!
//! A `PersonaContext` is fixed when a session is configured. The only field that
//! changes during a session is `intensity`, which the trainee may escalate one
//! step at a time (clamped at [`MAX_INTENSITY`]) and which only a full reset lowers.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Highest emotional intensity a persona can be escalated to.
pub const MAX_INTENSITY: u8 = 3;

/// Who the trainee is talking to, and how upset they are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaContext {
    pub name: String,
    pub role: String,
    /// Baseline mood, e.g. "Angry", "Anxious".
    pub mood: String,
    /// 0 = mildly annoyed .. 3 = potentially hostile.
    pub intensity: u8,
    /// Scenario description shown to the model.
    pub scenario: String,
    /// Free-form background ("You are ...").
    pub background: String,
}

impl Default for PersonaContext {
    fn default() -> Self {
        Self {
            name: "Amira".to_string(),
            role: "Hotel Guest".to_string(),
            mood: "Angry".to_string(),
            intensity: 0,
            scenario: "Handle a frustrated hotel guest whose room service order has been \
                significantly delayed during an important business conference."
                .to_string(),
            background: "You are a business traveler dealing with room service delays \
                during an important conference."
                .to_string(),
        }
    }
}

impl PersonaContext {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        mood: impl Into<String>,
        scenario: impl Into<String>,
        background: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            mood: mood.into(),
            intensity: 0,
            scenario: scenario.into(),
            background: background.into(),
        }
    }

    /// Builder-style intensity override, clamped to `0..=MAX_INTENSITY`.
    pub fn with_intensity(mut self, intensity: u8) -> Self {
        self.intensity = intensity.min(MAX_INTENSITY);
        self
    }

    /// Raise intensity by one step. Returns `false` when already at the maximum.
    pub fn escalate(&mut self) -> bool {
        if self.intensity >= MAX_INTENSITY {
            return false;
        }
        self.intensity += 1;
        true
    }

    /// Human-readable description of the current intensity, used in the system prompt.
    pub fn intensity_description(&self) -> &'static str {
        match self.intensity {
            0 => "mildly annoyed but still reasonable",
            1 => "noticeably frustrated and impatient",
            2 => "quite angry and demanding immediate action",
            _ => "extremely upset and potentially hostile",
        }
    }

    /// Reject personas that cannot produce a usable prompt.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Persona("name must not be empty".to_string()));
        }
        if self.role.trim().is_empty() {
            return Err(CoreError::Persona("role must not be empty".to_string()));
        }
        if self.intensity > MAX_INTENSITY {
            return Err(CoreError::Persona(format!(
                "intensity {} exceeds maximum {}",
                self.intensity, MAX_INTENSITY
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalate_clamps_at_max() {
        let mut persona = PersonaContext::default();
        assert!(persona.escalate());
        assert!(persona.escalate());
        assert!(persona.escalate());
        assert_eq!(persona.intensity, MAX_INTENSITY);
        assert!(!persona.escalate());
        assert_eq!(persona.intensity, MAX_INTENSITY);
    }

    #[test]
    fn with_intensity_is_clamped() {
        let persona = PersonaContext::default().with_intensity(9);
        assert_eq!(persona.intensity, 3);
        assert_eq!(
            persona.intensity_description(),
            "extremely upset and potentially hostile"
        );
    }

    #[test]
    fn validate_rejects_blank_name() {
        let mut persona = PersonaContext::default();
        persona.name = "  ".to_string();
        assert!(persona.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_intensity() {
        // Deserialized configs can bypass the clamping constructors.
        let mut persona = PersonaContext::default();
        persona.intensity = 7;
        assert!(matches!(persona.validate(), Err(CoreError::Persona(_))));
    }
}
