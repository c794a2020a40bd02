//! **Transcription** — live speech-to-text as a stream of cumulative partials and one final.
//!
//! A `TranscriptionSource` is restartable: every `start()` opens a fresh
//! subscription for one recording session, and `stop()` ends it. Capture failures
//! at start are returned as `VoiceError::Acquisition`; a connection that breaks
//! mid-utterance is reported in-band as `TranscriptEvent::Failed`.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use parley_core::TranscriptionSettings;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One update from the transcription service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// Cumulative text of the utterance so far.
    Partial(String),
    /// Settled text of the whole utterance; no further events follow.
    Final(String),
    /// The live connection broke.
    Failed(String),
}

/// Receiving half of a recording session's transcript.
pub type TranscriptStream = mpsc::Receiver<TranscriptEvent>;

const TRANSCRIPT_CHANNEL_CAPACITY: usize = 64;

#[async_trait]
pub trait TranscriptionSource: Send + Sync {
    /// Begin a recording session and subscribe to its transcript.
    async fn start(&self) -> VoiceResult<TranscriptStream>;

    /// End the current session. Idempotent.
    fn stop(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replays queued text as if it were spoken: growing partials at a fixed
/// cadence, then a final. Drives the CLI and deterministic tests.
#[derive(Debug)]
pub struct ScriptedTranscription {
    interval: Duration,
    words_per_partial: usize,
    queue: Mutex<VecDeque<String>>,
    session: Mutex<Option<CancellationToken>>,
}

impl ScriptedTranscription {
    pub fn new(interval: Duration, words_per_partial: usize) -> Self {
        Self {
            interval,
            words_per_partial: words_per_partial.max(1),
            queue: Mutex::new(VecDeque::new()),
            session: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &TranscriptionSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.partial_interval_ms),
            settings.words_per_partial,
        )
    }

    /// Queue the text the next recording session will "hear".
    pub fn queue_utterance(&self, text: impl Into<String>) {
        lock(&self.queue).push_back(text.into());
    }

    pub fn queued(&self) -> usize {
        lock(&self.queue).len()
    }
}

#[async_trait]
impl TranscriptionSource for ScriptedTranscription {
    async fn start(&self) -> VoiceResult<TranscriptStream> {
        let text = lock(&self.queue).pop_front().ok_or_else(|| {
            VoiceError::Acquisition("no scripted utterance queued".to_string())
        })?;

        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.session).replace(token.clone()) {
            previous.cancel();
        }

        let (tx, rx) = mpsc::channel(TRANSCRIPT_CHANNEL_CAPACITY);
        let interval = self.interval;
        let step = self.words_per_partial;
        info!(words = text.split_whitespace().count(), "🎙️ Scripted transcription started");

        tokio::spawn(async move {
            let words: Vec<&str> = text.split_whitespace().collect();
            let mut spoken = 0;
            while spoken < words.len() {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Scripted transcription stopped early");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                spoken = (spoken + step).min(words.len());
                let partial = words[..spoken].join(" ");
                if tx.send(TranscriptEvent::Partial(partial)).await.is_err() {
                    return;
                }
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    let _ = tx.send(TranscriptEvent::Final(words.join(" "))).await;
                }
            }
        });

        Ok(rx)
    }

    fn stop(&self) {
        if let Some(token) = lock(&self.session).take() {
            token.cancel();
        }
    }
}

/// Stand-in when no live transcription is wired: either reports the capture as
/// unavailable or hears a fixed response.
#[derive(Debug, Default)]
pub struct PlaceholderTranscription {
    /// If set, every session immediately finalizes with this text.
    pub response: Option<String>,
}

impl PlaceholderTranscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
        }
    }
}

#[async_trait]
impl TranscriptionSource for PlaceholderTranscription {
    async fn start(&self) -> VoiceResult<TranscriptStream> {
        let Some(text) = self.response.clone() else {
            return Err(VoiceError::Acquisition(
                "no transcription provider configured".to_string(),
            ));
        };
        let (tx, rx) = mpsc::channel(2);
        tx.send(TranscriptEvent::Final(text))
            .await
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))?;
        Ok(rx)
    }

    fn stop(&self) {}
}

/// Build the scripted source the presentation layer feeds utterances into.
pub fn create_transcription(settings: &TranscriptionSettings) -> Arc<ScriptedTranscription> {
    Arc::new(ScriptedTranscription::from_settings(settings))
}
