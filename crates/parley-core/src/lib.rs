//! parley-core: shared types for Parley role-play sessions.
//!
//! Holds the persona context the simulated customer is built from, the prompt
//! templates that keep the model in character, and the layered configuration
//! consumed by `parley-voice` and the add-ons.

mod config;
mod error;
mod persona;
pub mod prompts;

pub use config::{
    CoordinatorSettings, GenerationProvider, GenerationSettings, ParleyConfig, SpeechProvider,
    SpeechSettings, TranscriptionSettings,
};
pub use error::{CoreError, CoreResult};
pub use persona::{PersonaContext, MAX_INTENSITY};
pub use prompts::persona_system_prompt;
