//! Test doubles for driving a coordinator by hand.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parley_voice::{
    Collaborators, CoordinatorConfig, CoordinatorHandle, FragmentStream, GenerationRequest,
    GenerationSource, SessionSnapshot, SpeechSink, TranscriptEvent, TranscriptStream,
    TranscriptionSource, TurnCoordinator, VoiceError, VoiceResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

const WAIT_LIMIT: Duration = Duration::from_secs(30);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Transcription whose events the test pushes explicitly.
#[derive(Default)]
pub struct ManualTranscription {
    sender: Mutex<Option<mpsc::Sender<TranscriptEvent>>>,
    fail_next: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ManualTranscription {
    pub fn fail_next_start(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub async fn emit(&self, event: TranscriptEvent) {
        let sender = self.sender.lock().unwrap().clone();
        sender
            .expect("no recording session open")
            .send(event)
            .await
            .expect("coordinator dropped the transcript stream");
    }

    pub async fn partial(&self, text: &str) {
        self.emit(TranscriptEvent::Partial(text.to_string())).await;
    }

    pub async fn finalize(&self, text: &str) {
        self.emit(TranscriptEvent::Final(text.to_string())).await;
    }

    pub async fn fail(&self, message: &str) {
        self.emit(TranscriptEvent::Failed(message.to_string())).await;
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionSource for ManualTranscription {
    async fn start(&self) -> VoiceResult<TranscriptStream> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(VoiceError::Acquisition("microphone unavailable".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }
}

/// One `generate` call, with the means to answer it.
pub struct GenerationCall {
    pub request: GenerationRequest,
    pub cancel: CancellationToken,
    fragments: mpsc::UnboundedSender<VoiceResult<String>>,
}

impl GenerationCall {
    /// Stream a fragment. Silently ignored once the coordinator stopped listening.
    pub fn send(&self, text: &str) {
        let _ = self.fragments.send(Ok(text.to_string()));
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .fragments
            .send(Err(VoiceError::Generation(message.to_string())));
    }

    /// End the stream normally.
    pub fn finish(self) {}
}

/// Generation source that hands every call to the test.
pub struct RecordingGeneration {
    calls: mpsc::UnboundedSender<GenerationCall>,
    count: AtomicUsize,
}

impl RecordingGeneration {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<GenerationCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                calls,
                count: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl GenerationSource for RecordingGeneration {
    fn generate(&self, request: GenerationRequest, cancel: CancellationToken) -> FragmentStream {
        self.count.fetch_add(1, Ordering::SeqCst);
        let (fragments, rx) = mpsc::unbounded_channel();
        let _ = self.calls.send(GenerationCall {
            request,
            cancel,
            fragments,
        });
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// Speech sink that plays until the test says it is done.
#[derive(Default)]
pub struct ManualSpeech {
    spoken: Mutex<Vec<String>>,
    playing: Mutex<Option<oneshot::Sender<VoiceResult<()>>>>,
    stops: AtomicUsize,
}

impl ManualSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Wait until `n` replies have started playing.
    pub async fn wait_started(&self, n: usize) {
        for _ in 0..10_000 {
            if self.spoken.lock().unwrap().len() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("speech output never started reply #{n}");
    }

    pub fn finish(&self) {
        if let Some(playing) = self.playing.lock().unwrap().take() {
            let _ = playing.send(Ok(()));
        }
    }

    pub fn fail(&self, message: &str) {
        if let Some(playing) = self.playing.lock().unwrap().take() {
            let _ = playing.send(Err(VoiceError::Playback(message.to_string())));
        }
    }
}

#[async_trait]
impl SpeechSink for ManualSpeech {
    async fn speak(&self, text: &str, cancel: CancellationToken) -> VoiceResult<()> {
        let (tx, rx) = oneshot::channel();
        self.spoken.lock().unwrap().push(text.to_string());
        *self.playing.lock().unwrap() = Some(tx);
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = rx => result.unwrap_or(Ok(())),
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(playing) = self.playing.lock().unwrap().take() {
            let _ = playing.send(Ok(()));
        }
    }
}

/// A running coordinator wired to manual doubles.
pub struct Harness {
    pub handle: CoordinatorHandle,
    pub snapshots: watch::Receiver<SessionSnapshot>,
    pub transcription: Arc<ManualTranscription>,
    pub generation: Arc<RecordingGeneration>,
    pub calls: mpsc::UnboundedReceiver<GenerationCall>,
    pub speech: Arc<ManualSpeech>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        init_tracing();
        let transcription = Arc::new(ManualTranscription::default());
        let (generation, calls) = RecordingGeneration::new();
        let speech = Arc::new(ManualSpeech::default());
        let handle = TurnCoordinator::spawn(
            config,
            Collaborators {
                transcription: transcription.clone(),
                generation: generation.clone(),
                speech: speech.clone(),
            },
        );
        let snapshots = handle.subscribe();
        Self {
            handle,
            snapshots,
            transcription,
            generation,
            calls,
            speech,
        }
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        tokio::time::timeout(WAIT_LIMIT, self.snapshots.wait_for(predicate))
            .await
            .expect("timed out waiting for coordinator state")
            .expect("coordinator shut down")
            .clone()
    }

    /// Push a partial and wait until the coordinator has seen it.
    pub async fn say(&mut self, partial: &str) -> SessionSnapshot {
        self.transcription.partial(partial).await;
        let expected = partial.to_string();
        self.wait_for(move |s| s.partial_transcript == expected).await
    }

    pub async fn next_call(&mut self) -> GenerationCall {
        tokio::time::timeout(WAIT_LIMIT, self.calls.recv())
            .await
            .expect("timed out waiting for a generate call")
            .expect("generation source dropped")
    }

    /// Give the coordinator a chance to process anything already queued.
    pub async fn settle(&self) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }
}
