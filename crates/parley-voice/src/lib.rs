//! # Parley Voice - Turn Coordination
//!
//! Coordinates streaming speech recognition, streaming reply generation and
//! speech output into one low-latency, cancelable conversation turn for
//! role-play training against a simulated customer persona.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Turn Coordinator                        │
//! │  ┌───────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │ Transcription │→ │   Trigger    │→ │    Debouncer     │   │
//! │  │  (partials)   │  │  (> 20 chars)│  │     (350ms)      │   │
//! │  └───────────────┘  └──────────────┘  └──────────────────┘   │
//! │                                                ↓             │
//! │  ┌───────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │ Speech Output │← │ Conversation │← │ Cache / Generate │   │
//! │  │ (kill-switch) │  │     Log      │  │  (cancelable)    │   │
//! │  └───────────────┘  └──────────────┘  └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Phases: `Idle → Listening → Thinking → Speaking → Idle`.

pub mod cache;
pub mod conversation;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod generation;
pub mod phase;
pub mod snapshot;
pub mod speech;
pub mod transcription;
pub mod trigger;

pub use cache::{Fingerprint, ResponseCache};
pub use conversation::{ConversationLog, ConversationTurn, HistoryMessage, Speaker};
pub use coordinator::{
    Collaborators, CoordinatorConfig, CoordinatorHandle, TurnCoordinator, UserCommand,
};
pub use debounce::Debouncer;
pub use error::{VoiceError, VoiceResult};
pub use generation::{
    create_generation, FragmentStream, GenerationRequest, GenerationSource, OpenRouterGeneration,
    PlaceholderGeneration,
};
pub use phase::SessionPhase;
pub use snapshot::{CoordinatorEvent, SessionSnapshot};
pub use speech::{create_speech, CaptionSpeech, FallbackSpeech, OpenRouterSpeech, SpeechSink};
pub use transcription::{
    create_transcription, PlaceholderTranscription, ScriptedTranscription, TranscriptEvent,
    TranscriptStream, TranscriptionSource,
};
pub use trigger::TriggerPolicy;
