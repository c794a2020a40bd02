//! Role-play prompt templates: turn a `PersonaContext` into the system instruction
//! that keeps the model in character as the difficult customer.

use crate::persona::PersonaContext;

/// System instruction template. Placeholders are filled by [`persona_system_prompt`].
pub const PERSONA_SYSTEM_TEMPLATE: &str = r#"You are {name}, a {role} who is currently {mood} and {intensity_description}.

SCENARIO: {scenario}
BACKGROUND: {background}

PERSONALITY TRAITS:
- You are {mood} about your situation
- Your emotional intensity is {intensity}/3
- You want your problem resolved quickly
- You may escalate if you feel unheard or dismissed
- You can be calmed down with genuine empathy and concrete solutions

RESPONSE GUIDELINES:
- Keep responses under 50 words
- Stay in character as an upset {role}
- Show your emotional state through your words
- Respond naturally to what the student says
- If they show empathy and offer solutions, gradually become more cooperative
- If they dismiss you or seem unhelpful, become more frustrated
- Use realistic, conversational language
- Don't break character or mention you're an AI

Remember: You're a real person with a real problem, not a training simulation."#;

/// Build the in-character system prompt for the given persona.
pub fn persona_system_prompt(persona: &PersonaContext) -> String {
    let mood = persona.mood.to_lowercase();
    PERSONA_SYSTEM_TEMPLATE
        .replace("{name}", &persona.name)
        .replace("{role}", &persona.role)
        .replace("{mood}", &mood)
        .replace("{intensity_description}", persona.intensity_description())
        .replace("{intensity}", &persona.intensity.to_string())
        .replace("{scenario}", &persona.scenario)
        .replace("{background}", &persona.background)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_reflects_persona_and_intensity() {
        let persona = PersonaContext::new(
            "Tom",
            "Retail Customer",
            "Upset",
            "Return defective toys without a receipt.",
            "You are a frustrated parent.",
        )
        .with_intensity(2);

        let prompt = persona_system_prompt(&persona);
        assert!(prompt.starts_with("You are Tom, a Retail Customer who is currently upset"));
        assert!(prompt.contains("quite angry and demanding immediate action"));
        assert!(prompt.contains("Your emotional intensity is 2/3"));
        assert!(prompt.contains("SCENARIO: Return defective toys without a receipt."));
        assert!(!prompt.contains('{'));
    }
}
