//! **Generation** — persona reply text as a lazy, cancelable stream of fragments.
//!
//! `OpenRouterGeneration` speaks the OpenAI-compatible streaming chat-completions
//! protocol (SSE). `PlaceholderGeneration` streams a canned in-character line and
//! keeps the loop usable without an API key.

use crate::conversation::HistoryMessage;
use crate::error::{VoiceError, VoiceResult};
use futures::stream::BoxStream;
use futures::StreamExt;
use parley_core::{persona_system_prompt, GenerationProvider, GenerationSettings, PersonaContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a provider needs to draft one reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The trainee's (possibly still partial) utterance.
    pub prompt: String,
    pub persona: PersonaContext,
    /// Conversation before this utterance, oldest first.
    pub history: Vec<HistoryMessage>,
}

/// Reply fragments in order; an `Err` item ends the generation.
pub type FragmentStream = BoxStream<'static, VoiceResult<String>>;

const FRAGMENT_CHANNEL_CAPACITY: usize = 100;

pub trait GenerationSource: Send + Sync {
    /// Start drafting a reply. The stream ends early once `cancel` fires.
    fn generate(&self, request: GenerationRequest, cancel: CancellationToken) -> FragmentStream;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible streaming chat completions
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One meaningful SSE `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseData {
    Fragment(String),
    Done,
}

/// Splits a chunked SSE body into `data:` payloads.
///
/// Bytes are buffered until a newline so multi-byte characters and JSON objects
/// split across network chunks decode intact.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = Self::parse_line(line.trim()) {
                out.push(data);
            }
        }
        out
    }

    fn parse_line(line: &str) -> Option<SseData> {
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return Some(SseData::Done);
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .map(SseData::Fragment),
            Err(e) => {
                debug!(error = %e, data, "Ignoring unparseable SSE line");
                None
            }
        }
    }
}

/// Streaming chat completions against an OpenAI-compatible endpoint (OpenRouter by default).
#[derive(Debug, Clone)]
pub struct OpenRouterGeneration {
    /// Base URL without trailing slash.
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    client: reqwest::Client,
}

impl OpenRouterGeneration {
    pub fn new(settings: &GenerationSettings, api_key: impl Into<String>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        Ok(Self {
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            client,
        })
    }

    fn messages(request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: persona_system_prompt(&request.persona),
        });
        messages.extend(request.history.iter().map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        }));
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });
        messages
    }

    async fn stream_into(
        self,
        request: GenerationRequest,
        tx: mpsc::Sender<VoiceResult<String>>,
    ) -> VoiceResult<()> {
        let url = format!("{}/chat/completions", self.api_url);
        let body = ChatRequest {
            model: &self.model,
            messages: Self::messages(&request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Parley")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "chat completions error {}: {}",
                status, text
            )));
        }
        info!(model = %self.model, "SSE stream established");

        let mut decoder = SseDecoder::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| VoiceError::Generation(e.to_string()))?;
            for data in decoder.push(&chunk) {
                match data {
                    SseData::Done => return Ok(()),
                    SseData::Fragment(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl GenerationSource for OpenRouterGeneration {
    fn generate(&self, request: GenerationRequest, cancel: CancellationToken) -> FragmentStream {
        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move {
            let errors = tx.clone();
            tokio::select! {
                _ = cancel.cancelled() => debug!("Generation request cancelled"),
                result = this.stream_into(request, tx) => {
                    if let Err(e) = result {
                        let _ = errors.send(Err(e)).await;
                    }
                }
            }
        });
        ReceiverStream::new(rx).boxed()
    }
}

// ---------------------------------------------------------------------------
// Placeholder
// ---------------------------------------------------------------------------

/// Streams a canned line matching the persona's intensity, one word at a time.
#[derive(Debug, Clone)]
pub struct PlaceholderGeneration {
    word_delay: Duration,
}

impl Default for PlaceholderGeneration {
    fn default() -> Self {
        Self::new(Duration::from_millis(60))
    }
}

impl PlaceholderGeneration {
    pub fn new(word_delay: Duration) -> Self {
        Self { word_delay }
    }

    pub fn line_for(persona: &PersonaContext) -> &'static str {
        match persona.intensity {
            0 => "I appreciate you listening, but I really expected better than this.",
            1 => "Look, I have been waiting long enough. What are you going to do about it?",
            2 => "This is unacceptable! I want this fixed right now, not later.",
            _ => "I am done being patient. Get me your manager immediately!",
        }
    }
}

impl GenerationSource for PlaceholderGeneration {
    fn generate(&self, request: GenerationRequest, cancel: CancellationToken) -> FragmentStream {
        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let line = Self::line_for(&request.persona);
        let delay = self.word_delay;
        tokio::spawn(async move {
            for word in line.split_inclusive(' ') {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(Ok(word.to_string())).await.is_err() {
                    return;
                }
            }
        });
        ReceiverStream::new(rx).boxed()
    }
}

/// Pick the configured provider, falling back to the placeholder without a key.
pub fn create_generation(settings: &GenerationSettings) -> VoiceResult<Arc<dyn GenerationSource>> {
    match settings.provider {
        GenerationProvider::Placeholder => Ok(Arc::new(PlaceholderGeneration::default())),
        GenerationProvider::OpenRouter => match settings.resolve_api_key() {
            Some(key) => {
                info!(model = %settings.model, "Using OpenRouter generation");
                Ok(Arc::new(OpenRouterGeneration::new(settings, key)?))
            }
            None => {
                warn!("No generation API key (PARLEY_LLM_API_KEY / OPENROUTER_API_KEY); using placeholder replies");
                Ok(Arc::new(PlaceholderGeneration::default()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(intensity: u8) -> GenerationRequest {
        GenerationRequest {
            prompt: "I would like a refund".to_string(),
            persona: PersonaContext::default().with_intensity(intensity),
            history: vec![HistoryMessage {
                role: "assistant".to_string(),
                content: "Finally, someone answers.".to_string(),
            }],
        }
    }

    #[test]
    fn sse_decoder_handles_split_chunks_and_done() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());
        let second = decoder.push(b"lo\"}}]}\n\n: keep-alive\ndata: not json\ndata: [DONE]\n");
        assert_eq!(
            second,
            vec![SseData::Fragment("Hello".to_string()), SseData::Done]
        );
    }

    #[test]
    fn sse_decoder_skips_empty_deltas() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\ndata: {\"choices\":[]}\n");
        assert!(out.is_empty());
    }

    #[test]
    fn sse_decoder_keeps_multibyte_characters_across_chunks() {
        let mut decoder = SseDecoder::default();
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let split = payload.len() - 6;
        assert!(decoder.push(&payload[..split]).is_empty());
        assert_eq!(
            decoder.push(&payload[split..]),
            vec![SseData::Fragment("café".to_string())]
        );
    }

    #[test]
    fn chat_messages_are_system_history_then_prompt() {
        let messages = OpenRouterGeneration::messages(&request(1));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("noticeably frustrated and impatient"));
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content, "I would like a refund");
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_streams_the_intensity_line() {
        let generation = PlaceholderGeneration::default();
        let fragments: Vec<String> = generation
            .generate(request(2), CancellationToken::new())
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), PlaceholderGeneration::line_for(&request(2).persona));
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_stops_on_cancel() {
        let generation = PlaceholderGeneration::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let mut stream = generation.generate(request(0), cancel.clone());
        assert!(stream.next().await.is_some());
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn placeholder_provider_is_selected_without_key() {
        let settings = GenerationSettings {
            provider: GenerationProvider::Placeholder,
            ..GenerationSettings::default()
        };
        assert!(create_generation(&settings).is_ok());
    }
}
