//! **Speech output** — finished reply text to audible speech, plus the kill-switch.
//!
//! `speak` resolves once playback has finished or its token was cancelled; `stop`
//! silences output immediately and is safe to call at any time.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use parley_core::{SpeechProvider, SpeechSettings};
use serde::Serialize;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait]
pub trait SpeechSink: Send + Sync {
    /// Speak `text`, resolving when playback ends. Cancelling `cancel`, even
    /// before the first poll, ends playback early with `Ok(())`.
    async fn speak(&self, text: &str, cancel: CancellationToken) -> VoiceResult<()>;

    /// Interrupt playback. Idempotent.
    fn stop(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Tracks the playback in progress so `stop` can reach it.
#[derive(Debug, Default)]
struct Interrupter {
    current: Mutex<CancellationToken>,
}

impl Interrupter {
    /// Token for one playback: cancelled by the caller's `cancel` or by `interrupt`.
    fn arm(&self, cancel: &CancellationToken) -> CancellationToken {
        let token = cancel.child_token();
        *lock(&self.current) = token.clone();
        token
    }

    fn interrupt(&self) {
        lock(&self.current).cancel();
    }
}

/// Degraded output that always works: logs the reply as a caption and holds
/// for roughly the time it takes to read it aloud.
#[derive(Debug)]
pub struct CaptionSpeech {
    words_per_minute: u32,
    interrupter: Interrupter,
}

impl Default for CaptionSpeech {
    fn default() -> Self {
        Self::new(165)
    }
}

impl CaptionSpeech {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
            interrupter: Interrupter::default(),
        }
    }

    /// Estimated time to say `text` at the configured pace.
    pub fn reading_time(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u64;
        Duration::from_millis(words * 60_000 / u64::from(self.words_per_minute))
    }
}

#[async_trait]
impl SpeechSink for CaptionSpeech {
    async fn speak(&self, text: &str, cancel: CancellationToken) -> VoiceResult<()> {
        let token = self.interrupter.arm(&cancel);
        info!(target: "parley::caption", "🗨️ {}", text);
        tokio::select! {
            _ = token.cancelled() => debug!("Caption interrupted"),
            _ = tokio::time::sleep(self.reading_time(text)) => {}
        }
        Ok(())
    }

    fn stop(&self) {
        self.interrupter.interrupt();
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// OpenAI-compatible `/audio/speech` synthesis, played by piping the audio into
/// an external player process (ffplay by default).
#[derive(Debug)]
pub struct OpenRouterSpeech {
    /// Base URL without trailing slash.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    /// Player command line; audio is written to its stdin.
    pub player: Vec<String>,
    client: reqwest::Client,
    interrupter: Interrupter,
}

impl OpenRouterSpeech {
    pub fn new(settings: &SpeechSettings, api_key: impl Into<String>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(Self {
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            player: settings.player.clone(),
            client,
            interrupter: Interrupter::default(),
        })
    }

    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let url = format!("{}/audio/speech", self.api_url);
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "mp3",
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VoiceError::Playback(format!("TTS API error {}: {}", status, text)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn play(&self, audio: Vec<u8>, token: CancellationToken) -> VoiceResult<()> {
        let (program, args) = self
            .player
            .split_first()
            .ok_or_else(|| VoiceError::Playback("no audio player configured".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Playback(format!("failed to start {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    return Ok(());
                }
                written = stdin.write_all(&audio) => {
                    written.map_err(|e| VoiceError::Playback(e.to_string()))?;
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => {
                debug!("Playback interrupted");
                let _ = child.kill().await;
                Ok(())
            }
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(VoiceError::Playback(format!("{} exited with {}", program, status)))
                }
            }
        }
    }
}

#[async_trait]
impl SpeechSink for OpenRouterSpeech {
    async fn speak(&self, text: &str, cancel: CancellationToken) -> VoiceResult<()> {
        let token = self.interrupter.arm(&cancel);
        let audio = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            audio = self.synthesize(text) => audio?,
        };
        if audio.is_empty() {
            return Ok(());
        }
        info!(bytes = audio.len(), voice = %self.voice, "🔊 Playing synthesized reply");
        self.play(audio, token).await
    }

    fn stop(&self) {
        self.interrupter.interrupt();
    }
}

/// Tries `primary`; on a playback failure speaks through `fallback` instead.
pub struct FallbackSpeech {
    primary: Arc<dyn SpeechSink>,
    fallback: Arc<dyn SpeechSink>,
}

impl FallbackSpeech {
    pub fn new(primary: Arc<dyn SpeechSink>, fallback: Arc<dyn SpeechSink>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SpeechSink for FallbackSpeech {
    async fn speak(&self, text: &str, cancel: CancellationToken) -> VoiceResult<()> {
        match self.primary.speak(text, cancel.clone()).await {
            Err(VoiceError::Playback(reason)) if !cancel.is_cancelled() => {
                warn!(%reason, "Speech output failed, degrading to captions");
                self.fallback.speak(text, cancel).await
            }
            other => other,
        }
    }

    fn stop(&self) {
        self.primary.stop();
        self.fallback.stop();
    }
}

/// Build the configured speech output. Without a key only captions are available.
pub fn create_speech(settings: &SpeechSettings) -> VoiceResult<Arc<dyn SpeechSink>> {
    let captions: Arc<dyn SpeechSink> = Arc::new(CaptionSpeech::new(settings.words_per_minute));
    match settings.provider {
        SpeechProvider::Caption => Ok(captions),
        SpeechProvider::OpenRouter => match settings.resolve_api_key() {
            Some(key) => {
                let primary = Arc::new(OpenRouterSpeech::new(settings, key)?);
                Ok(Arc::new(FallbackSpeech::new(primary, captions)))
            }
            None => {
                warn!("No speech API key (PARLEY_TTS_API_KEY / OPENROUTER_API_KEY); replies will be captioned only");
                Ok(captions)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Broken {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSink for Broken {
        async fn speak(&self, _text: &str, _cancel: CancellationToken) -> VoiceResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(VoiceError::Playback("device busy".to_string()))
        }

        fn stop(&self) {}
    }

    #[test]
    fn reading_time_follows_pace() {
        let captions = CaptionSpeech::new(120);
        assert_eq!(captions.reading_time("one two three four"), Duration::from_secs(2));
        assert_eq!(captions.reading_time(""), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn caption_waits_for_reading_time() {
        let captions = CaptionSpeech::new(60);
        let start = tokio::time::Instant::now();
        captions
            .speak("three short words", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn caption_cancelled_before_start_is_silent() {
        let captions = CaptionSpeech::new(60);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = tokio::time::Instant::now();
        captions
            .speak("a reply nobody wants to hear anymore", cancel)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn caption_stop_interrupts_and_rearms() {
        let captions = Arc::new(CaptionSpeech::new(60));
        let speaking = {
            let captions = captions.clone();
            tokio::spawn(async move {
                captions
                    .speak("a long reply that takes a while", CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        captions.stop();
        speaking.await.unwrap().unwrap();

        // A later reply plays in full.
        let start = tokio::time::Instant::now();
        captions.speak("again", CancellationToken::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_degrades_on_playback_error() {
        let broken = Arc::new(Broken {
            calls: AtomicUsize::new(0),
        });
        let speech = FallbackSpeech::new(broken.clone(), Arc::new(CaptionSpeech::default()));
        speech
            .speak("You call this service?", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_player_is_a_playback_error() {
        let settings = SpeechSettings {
            player: Vec::new(),
            ..SpeechSettings::default()
        };
        let speech = OpenRouterSpeech::new(&settings, "key").unwrap();
        let err = speech
            .play(vec![0u8; 4], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Playback(_)));
    }

    #[test]
    fn caption_provider_needs_no_key() {
        let settings = SpeechSettings {
            provider: SpeechProvider::Caption,
            ..SpeechSettings::default()
        };
        assert!(create_speech(&settings).is_ok());
    }
}
