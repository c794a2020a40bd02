//! Error types for the Parley voice pipeline

use parley_core::CoreError;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised at the boundaries of the turn coordinator.
///
/// The coordinator never lets these escape to the presentation layer as panics or
/// unhandled results: each one is converted into `SessionSnapshot::error` (or, for
/// playback, degraded output) where the external call was made.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Capture device (or scripted input) unavailable when recording starts.
    #[error("Capture unavailable: {0}")]
    Acquisition(String),

    /// Live transcription connection broke mid-utterance.
    #[error("Transcription stream error: {0}")]
    Stream(String),

    /// Reply generation failed (transport, provider, or empty reply).
    #[error("Generation error: {0}")]
    Generation(String),

    /// Speech synthesis or playback failed.
    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Command not valid in the current phase.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Turn coordinator has shut down")]
    CoordinatorClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for VoiceError {
    fn from(err: CoreError) -> Self {
        VoiceError::Config(err.to_string())
    }
}
