//! Turn Coordinator - the single owner of session state
//!
//! One tokio task owns the phase, conversation log, response cache, trigger
//! flag, debounce timer, pending generation and playback. Everything else talks
//! to it through a `CoordinatorHandle` (commands with acks) or observes it through
//! a `watch` snapshot and a `broadcast` event stream.
//!
//! Work that can take a while never runs on the coordinator task: generation
//! streams are pumped by a spawned task and playback runs in another, both
//! reporting back as internal events tagged with the id of the operation that
//! produced them. Events carrying a stale id are dropped.

use crate::cache::{Fingerprint, ResponseCache};
use crate::conversation::{ConversationLog, Speaker};
use crate::debounce::Debouncer;
use crate::error::{VoiceError, VoiceResult};
use crate::generation::{FragmentStream, GenerationRequest, GenerationSource};
use crate::phase::SessionPhase;
use crate::snapshot::{CoordinatorEvent, SessionSnapshot};
use crate::speech::SpeechSink;
use crate::transcription::{TranscriptEvent, TranscriptStream, TranscriptionSource};
use crate::trigger::TriggerPolicy;
use futures::StreamExt;
use parley_core::{ParleyConfig, PersonaContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Policy knobs for one coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Trimmed partial length (chars) that must be exceeded to trigger (default: 20)
    pub trigger_threshold_chars: usize,

    /// Quiet period between trigger and generation call (default: 350ms)
    pub debounce: Duration,

    /// Persona at session start; reset returns to it.
    pub persona: PersonaContext,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            trigger_threshold_chars: 20,
            debounce: Duration::from_millis(350),
            persona: PersonaContext::default(),
        }
    }
}

impl From<&ParleyConfig> for CoordinatorConfig {
    fn from(config: &ParleyConfig) -> Self {
        Self {
            trigger_threshold_chars: config.coordinator.trigger_threshold_chars,
            debounce: Duration::from_millis(config.coordinator.debounce_ms),
            persona: config.initial_persona(),
        }
    }
}

/// The external sources and sink a coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub transcription: Arc<dyn TranscriptionSource>,
    pub generation: Arc<dyn GenerationSource>,
    pub speech: Arc<dyn SpeechSink>,
}

/// Commands the presentation layer can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    StartRecording,
    StopRecording,
    CancelGeneration,
    StopSpeech,
    Reset,
    Escalate,
    ClearError,
}

enum Request {
    Command {
        command: UserCommand,
        reply: oneshot::Sender<VoiceResult<()>>,
    },
    CachedReply {
        fingerprint: Fingerprint,
        reply: oneshot::Sender<Option<String>>,
    },
}

#[derive(Debug)]
enum Internal {
    Fragment {
        generation_id: u64,
        text: String,
    },
    GenerationFinished {
        generation_id: u64,
        result: VoiceResult<()>,
    },
    PlaybackFinished {
        playback_id: u64,
        result: VoiceResult<()>,
    },
}

struct PendingGeneration {
    id: u64,
    prompt: String,
    fingerprint: Fingerprint,
    cancel: CancellationToken,
    buffer: String,
}

/// Reply currently handed to speech output.
struct ActivePlayback {
    id: u64,
    cancel: CancellationToken,
}

/// Cloneable front door to a running coordinator.
///
/// The coordinator shuts down (cancelling generation and silencing speech) once
/// every handle has been dropped.
#[derive(Clone)]
pub struct CoordinatorHandle {
    requests: mpsc::Sender<Request>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Issue a command and wait until the coordinator has processed it.
    pub async fn send(&self, command: UserCommand) -> VoiceResult<()> {
        let (reply, ack) = oneshot::channel();
        self.requests
            .send(Request::Command { command, reply })
            .await
            .map_err(|_| VoiceError::CoordinatorClosed)?;
        ack.await.map_err(|_| VoiceError::CoordinatorClosed)?
    }

    pub async fn start_recording(&self) -> VoiceResult<()> {
        self.send(UserCommand::StartRecording).await
    }

    pub async fn stop_recording(&self) -> VoiceResult<()> {
        self.send(UserCommand::StopRecording).await
    }

    pub async fn cancel_generation(&self) -> VoiceResult<()> {
        self.send(UserCommand::CancelGeneration).await
    }

    pub async fn stop_speech(&self) -> VoiceResult<()> {
        self.send(UserCommand::StopSpeech).await
    }

    pub async fn reset(&self) -> VoiceResult<()> {
        self.send(UserCommand::Reset).await
    }

    pub async fn escalate(&self) -> VoiceResult<()> {
        self.send(UserCommand::Escalate).await
    }

    pub async fn clear_error(&self) -> VoiceResult<()> {
        self.send(UserCommand::ClearError).await
    }

    /// Text cached for `fingerprint`, if any fragment of it has been received.
    pub async fn cached_reply(&self, fingerprint: Fingerprint) -> VoiceResult<Option<String>> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(Request::CachedReply { fingerprint, reply })
            .await
            .map_err(|_| VoiceError::CoordinatorClosed)?;
        answer.await.map_err(|_| VoiceError::CoordinatorClosed)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// The coordinator task's state.
pub struct TurnCoordinator {
    collaborators: Collaborators,
    baseline_persona: PersonaContext,

    phase: SessionPhase,
    persona: PersonaContext,
    log: ConversationLog,
    cache: ResponseCache,
    trigger: TriggerPolicy,
    debouncer: Debouncer<String>,

    // Recording
    transcript: Option<TranscriptStream>,
    partial_text: String,
    final_text: String,
    /// Log length when the current utterance started; its history stops here.
    utterance_log_mark: usize,
    /// Ended utterance waiting for its reply before both are logged.
    awaiting_reply: Option<String>,
    /// The current utterance's reply was cancelled or failed.
    exchange_dropped: bool,

    // Reply
    pending: Option<PendingGeneration>,
    ready_reply: Option<String>,
    reply_text: String,
    generation_aborted: bool,
    next_generation_id: u64,

    // Playback
    playback: Option<ActivePlayback>,
    next_playback_id: u64,

    error: Option<String>,

    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<CoordinatorEvent>,
}

impl TurnCoordinator {
    /// Start a coordinator task on the current runtime.
    pub fn spawn(config: CoordinatorConfig, collaborators: Collaborators) -> CoordinatorHandle {
        let (requests_tx, requests_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot::default());

        let coordinator = Self {
            collaborators,
            baseline_persona: config.persona.clone(),
            phase: SessionPhase::Idle,
            persona: config.persona,
            log: ConversationLog::new(),
            cache: ResponseCache::new(),
            trigger: TriggerPolicy::new(config.trigger_threshold_chars),
            debouncer: Debouncer::new(config.debounce),
            transcript: None,
            partial_text: String::new(),
            final_text: String::new(),
            utterance_log_mark: 0,
            awaiting_reply: None,
            exchange_dropped: false,
            pending: None,
            ready_reply: None,
            reply_text: String::new(),
            generation_aborted: false,
            next_generation_id: 1,
            playback: None,
            next_playback_id: 1,
            error: None,
            internal_tx,
            internal_rx,
            snapshot_tx,
            events_tx: events_tx.clone(),
        };
        coordinator.publish();

        info!(
            target: "parley::voice",
            threshold = config.trigger_threshold_chars,
            debounce_ms = config.debounce.as_millis() as u64,
            "🎭 Turn coordinator started"
        );
        tokio::spawn(coordinator.run(requests_rx));

        CoordinatorHandle {
            requests: requests_tx,
            snapshot,
            events: events_tx,
        }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                event = next_transcript_event(&mut self.transcript) => self.on_transcript(event),
                text = self.debouncer.elapsed() => self.fire_generation(text),
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal),
            }
            self.publish();
        }
        self.shutdown();
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Command { command, reply } => {
                let result = self.handle_command(command).await;
                // Callers see the state their command produced.
                self.publish();
                let _ = reply.send(result);
            }
            Request::CachedReply { fingerprint, reply } => {
                let _ = reply.send(self.cache.get(&fingerprint).map(str::to_string));
            }
        }
    }

    async fn handle_command(&mut self, command: UserCommand) -> VoiceResult<()> {
        debug!(target: "parley::voice", ?command, phase = %self.phase, "Command received");
        match command {
            UserCommand::StartRecording => self.start_recording().await,
            UserCommand::StopRecording => {
                if self.phase == SessionPhase::Listening {
                    self.end_utterance(None);
                }
                Ok(())
            }
            UserCommand::CancelGeneration => {
                self.cancel_generation();
                Ok(())
            }
            UserCommand::StopSpeech => {
                if self.phase == SessionPhase::Speaking {
                    self.stop_playback();
                    self.set_phase(SessionPhase::Idle);
                }
                Ok(())
            }
            UserCommand::Reset => {
                self.reset();
                Ok(())
            }
            UserCommand::Escalate => {
                if self.persona.escalate() {
                    info!(target: "parley::voice", intensity = self.persona.intensity, "📈 Persona escalated");
                    self.emit(CoordinatorEvent::IntensityChanged {
                        intensity: self.persona.intensity,
                    });
                }
                Ok(())
            }
            UserCommand::ClearError => {
                self.error = None;
                Ok(())
            }
        }
    }

    async fn start_recording(&mut self) -> VoiceResult<()> {
        match self.phase {
            SessionPhase::Listening | SessionPhase::Thinking => {
                return Err(VoiceError::InvalidCommand(format!(
                    "cannot start recording while {}",
                    self.phase
                )));
            }
            SessionPhase::Speaking => {
                info!(target: "parley::voice", "⚡ Interruption: user started speaking over the reply");
                self.stop_playback();
            }
            SessionPhase::Idle => {}
        }

        match self.collaborators.transcription.start().await {
            Ok(stream) => {
                self.transcript = Some(stream);
                self.trigger.reset();
                self.partial_text.clear();
                self.final_text.clear();
                self.reply_text.clear();
                self.generation_aborted = false;
                self.exchange_dropped = false;
                self.awaiting_reply = None;
                self.utterance_log_mark = self.log.len();
                self.set_phase(SessionPhase::Listening);
                Ok(())
            }
            Err(e) => {
                warn!(target: "parley::voice", error = %e, "Recording could not start");
                self.surface_error(&e);
                self.set_phase(SessionPhase::Idle);
                Err(e)
            }
        }
    }

    fn on_transcript(&mut self, event: Option<TranscriptEvent>) {
        if self.phase != SessionPhase::Listening {
            self.transcript = None;
            return;
        }
        match event {
            Some(TranscriptEvent::Partial(text)) => {
                self.partial_text = text.clone();
                self.emit(CoordinatorEvent::PartialTranscript { text: text.clone() });
                if self.trigger.observe(&text) {
                    debug!(target: "parley::voice", chars = text.trim().chars().count(), "Trigger fired");
                    self.debouncer.schedule(text.clone());
                    self.emit(CoordinatorEvent::GenerationScheduled { text });
                }
            }
            Some(TranscriptEvent::Final(text)) => {
                self.partial_text = text.clone();
                self.final_text = text.clone();
                self.emit(CoordinatorEvent::FinalTranscript { text: text.clone() });
                self.end_utterance(Some(text));
            }
            Some(TranscriptEvent::Failed(message)) => {
                let e = VoiceError::Stream(message);
                warn!(target: "parley::voice", error = %e, "Transcription stream broke");
                self.surface_error(&e);
                self.end_utterance(None);
            }
            None => {
                debug!(target: "parley::voice", "Transcript stream closed without a final");
                self.end_utterance(None);
            }
        }
    }

    /// Close the current utterance and pick the next phase.
    fn end_utterance(&mut self, final_text: Option<String>) {
        self.transcript = None;
        self.collaborators.transcription.stop();

        let text = final_text.unwrap_or_else(|| self.partial_text.clone());
        let text = text.trim().to_string();
        if !text.is_empty() {
            self.final_text = text.clone();
        }
        self.awaiting_reply = Some(text);

        if let Some(reply) = self.ready_reply.take() {
            self.deliver(reply);
        } else if self.pending.is_some() || self.debouncer.is_armed() {
            self.set_phase(SessionPhase::Thinking);
        } else {
            // No reply is coming: the utterance stands alone unless its reply was abandoned.
            if let Some(text) = self.awaiting_reply.take() {
                if !self.exchange_dropped && !text.is_empty() {
                    self.append_turn(Speaker::User, text);
                }
            }
            self.set_phase(SessionPhase::Idle);
        }
    }

    /// Forget the current exchange; nothing of it reaches the log.
    fn drop_exchange(&mut self) {
        self.exchange_dropped = true;
        self.awaiting_reply = None;
        self.ready_reply = None;
    }

    fn fire_generation(&mut self, text: String) {
        if !matches!(self.phase, SessionPhase::Listening | SessionPhase::Thinking) {
            debug!(target: "parley::voice", phase = %self.phase, "Debounce elapsed outside a turn, ignoring");
            return;
        }

        let request = GenerationRequest {
            prompt: text.clone(),
            persona: self.persona.clone(),
            history: self.log.history_until(self.utterance_log_mark),
        };
        let fingerprint = Fingerprint::of(&request);
        let generation_id = self.next_generation_id;
        self.next_generation_id += 1;
        self.generation_aborted = false;

        let cached = self
            .cache
            .get(&fingerprint)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string);
        if let Some(cached) = cached {
            info!(target: "parley::voice", generation_id, "♻️ Reply served from cache");
            self.emit(CoordinatorEvent::GenerationStarted {
                generation_id,
                cached: true,
            });
            self.reply_text = cached.clone();
            self.emit(CoordinatorEvent::ReplyFragment {
                generation_id,
                text: cached.clone(),
            });
            self.complete_reply(cached);
            return;
        }

        info!(target: "parley::voice", generation_id, prompt = %text, "🧠 Generation started");
        let cancel = CancellationToken::new();
        let stream = self
            .collaborators
            .generation
            .generate(request, cancel.clone());
        tokio::spawn(pump_generation(
            generation_id,
            stream,
            cancel.clone(),
            self.internal_tx.clone(),
        ));

        self.reply_text.clear();
        self.pending = Some(PendingGeneration {
            id: generation_id,
            prompt: text,
            fingerprint,
            cancel,
            buffer: String::new(),
        });
        self.emit(CoordinatorEvent::GenerationStarted {
            generation_id,
            cached: false,
        });
    }

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Fragment {
                generation_id,
                text,
            } => {
                let Some(pending) = self.pending.as_mut().filter(|p| p.id == generation_id) else {
                    debug!(target: "parley::voice", generation_id, "Dropping fragment from stale generation");
                    return;
                };
                pending.buffer.push_str(&text);
                self.cache.append(&pending.fingerprint, &text);
                self.reply_text = pending.buffer.clone();
                self.emit(CoordinatorEvent::ReplyFragment {
                    generation_id,
                    text,
                });
            }
            Internal::GenerationFinished {
                generation_id,
                result,
            } => {
                if self.pending.as_ref().map(|p| p.id) != Some(generation_id) {
                    debug!(target: "parley::voice", generation_id, "Dropping completion of stale generation");
                    return;
                }
                let Some(pending) = self.pending.take() else {
                    return;
                };
                let outcome = result.and_then(|()| {
                    if pending.buffer.trim().is_empty() {
                        Err(VoiceError::Generation("empty reply".to_string()))
                    } else {
                        Ok(())
                    }
                });
                match outcome {
                    Ok(()) => {
                        info!(
                            target: "parley::voice",
                            generation_id,
                            prompt = %pending.prompt,
                            chars = pending.buffer.chars().count(),
                            "✅ Generation complete"
                        );
                        self.complete_reply(pending.buffer);
                    }
                    Err(e) => {
                        warn!(target: "parley::voice", generation_id, error = %e, "Generation failed");
                        self.surface_error(&e);
                        self.drop_exchange();
                        if self.phase == SessionPhase::Thinking {
                            self.set_phase(SessionPhase::Idle);
                        }
                    }
                }
            }
            Internal::PlaybackFinished {
                playback_id,
                result,
            } => {
                if self.playback.as_ref().map(|p| p.id) != Some(playback_id) {
                    debug!(target: "parley::voice", playback_id, "Dropping stale playback completion");
                    return;
                }
                self.playback = None;
                if let Err(e) = result {
                    warn!(target: "parley::voice", error = %e, "Speech output failed; reply stays captioned only");
                }
                self.set_phase(SessionPhase::Idle);
            }
        }
    }

    /// A reply is ready: speak it now, or hold it until the user stops talking.
    fn complete_reply(&mut self, reply: String) {
        match self.phase {
            SessionPhase::Thinking => self.deliver(reply),
            SessionPhase::Listening => {
                debug!(target: "parley::voice", "Reply ready before the utterance ended, holding it");
                self.ready_reply = Some(reply);
            }
            phase => {
                debug!(target: "parley::voice", %phase, "Discarding reply completed outside a turn");
            }
        }
    }

    fn deliver(&mut self, reply: String) {
        self.reply_text = reply.clone();
        if let Some(utterance) = self.awaiting_reply.take().filter(|t| !t.is_empty()) {
            self.append_turn(Speaker::User, utterance);
        }
        self.append_turn(Speaker::Agent, reply.clone());

        let playback_id = self.next_playback_id;
        self.next_playback_id += 1;
        let cancel = CancellationToken::new();
        self.playback = Some(ActivePlayback {
            id: playback_id,
            cancel: cancel.clone(),
        });

        let speech = self.collaborators.speech.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = speech.speak(&reply, cancel).await;
            let _ = internal.send(Internal::PlaybackFinished {
                playback_id,
                result,
            });
        });
        self.set_phase(SessionPhase::Speaking);
    }

    fn cancel_generation(&mut self) {
        let debounced = self.debouncer.cancel();
        let pending = self.pending.take();
        let ready = self.ready_reply.take();
        if debounced.is_none() && pending.is_none() && ready.is_none() {
            return;
        }

        if let Some(pending) = pending {
            pending.cancel.cancel();
            info!(
                target: "parley::voice",
                generation_id = pending.id,
                received = pending.buffer.chars().count(),
                "🛑 Generation cancelled"
            );
            self.emit(CoordinatorEvent::GenerationCancelled {
                generation_id: pending.id,
            });
        }
        self.reply_text.clear();
        self.generation_aborted = true;
        self.drop_exchange();
        if self.phase == SessionPhase::Thinking {
            self.set_phase(SessionPhase::Idle);
        }
    }

    fn stop_playback(&mut self) {
        if let Some(playback) = self.playback.take() {
            debug!(target: "parley::voice", playback_id = playback.id, "Silencing speech output");
            playback.cancel.cancel();
        }
        self.collaborators.speech.stop();
    }

    fn reset(&mut self) {
        info!(target: "parley::voice", "🔄 Session reset");
        self.debouncer.cancel();
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.ready_reply = None;
        self.stop_playback();
        self.transcript = None;
        self.collaborators.transcription.stop();

        self.log.clear();
        self.cache.clear();
        self.trigger.reset();
        self.error = None;
        self.partial_text.clear();
        self.final_text.clear();
        self.reply_text.clear();
        self.generation_aborted = false;
        self.exchange_dropped = false;
        self.awaiting_reply = None;
        self.utterance_log_mark = 0;

        if self.persona.intensity != self.baseline_persona.intensity {
            self.emit(CoordinatorEvent::IntensityChanged {
                intensity: self.baseline_persona.intensity,
            });
        }
        self.persona = self.baseline_persona.clone();
        self.set_phase(SessionPhase::Idle);
        self.emit(CoordinatorEvent::Reset);
    }

    fn shutdown(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.stop_playback();
        self.collaborators.transcription.stop();
        info!(target: "parley::voice", "Turn coordinator stopped");
    }

    fn append_turn(&mut self, speaker: Speaker, text: String) {
        let turn = self.log.push(speaker, text).clone();
        self.emit(CoordinatorEvent::TurnAppended { turn });
    }

    fn set_phase(&mut self, to: SessionPhase) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;
        info!(target: "parley::voice", %from, %to, "Phase transition");
        self.emit(CoordinatorEvent::PhaseChanged { from, to });
    }

    fn surface_error(&mut self, error: &VoiceError) {
        let message = error.to_string();
        self.error = Some(message.clone());
        self.emit(CoordinatorEvent::Error { message });
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            partial_transcript: self.partial_text.clone(),
            final_transcript: self.final_text.clone(),
            streaming_reply: self.reply_text.clone(),
            error: self.error.clone(),
            conversation: self.log.turns().to_vec(),
            intensity: self.persona.intensity,
            generation_aborted: self.generation_aborted,
            reply_pending: self.pending.is_some() || self.debouncer.is_armed(),
            cache_entries: self.cache.len(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

async fn next_transcript_event(stream: &mut Option<TranscriptStream>) -> Option<TranscriptEvent> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Forward a generation's fragments to the coordinator until it ends or is cancelled.
async fn pump_generation(
    generation_id: u64,
    mut stream: FragmentStream,
    cancel: CancellationToken,
    internal: mpsc::UnboundedSender<Internal>,
) {
    let result = loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(text)) => {
                if text.is_empty() {
                    continue;
                }
                if internal
                    .send(Internal::Fragment {
                        generation_id,
                        text,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Some(Err(e)) => break Err(e),
            None => break Ok(()),
        }
    };
    let _ = internal.send(Internal::GenerationFinished {
        generation_id,
        result,
    });
}
