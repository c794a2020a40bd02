//! Session configuration for Parley.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML file
//! (`PARLEY_CONFIG` path, else `config/parley.toml`), then `PARLEY__*` environment
//! overrides (double underscore separates sections, e.g. `PARLEY__COORDINATOR__DEBOUNCE_MS=500`).
//! API keys are never read from the layered sources' defaults; they come from the file
//! or the dedicated env vars listed on each settings struct.

use crate::error::{CoreError, CoreResult};
use crate::persona::{PersonaContext, MAX_INTENSITY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

const DEFAULT_CONFIG_PATH: &str = "config/parley.toml";
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Top-level configuration for one training session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub coordinator: CoordinatorSettings,
    pub generation: GenerationSettings,
    pub speech: SpeechSettings,
    pub transcription: TranscriptionSettings,
    pub persona: PersonaContext,
}

/// Trigger/debounce policy of the turn coordinator.
///
/// | Key | Default | Description |
/// |-----|---------|-------------|
/// | trigger_threshold_chars | 20 | Partial transcript must be longer than this to start a reply. |
/// | debounce_ms | 350 | Quiet period between the trigger and the generation call. |
/// | baseline_intensity | 0 | Persona intensity at session start and after reset. |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub trigger_threshold_chars: usize,
    pub debounce_ms: u64,
    pub baseline_intensity: u8,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            trigger_threshold_chars: 20,
            debounce_ms: 350,
            baseline_intensity: 0,
        }
    }
}

/// Which generation backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// OpenAI-compatible streaming chat completions (OpenRouter, OpenAI, local servers).
    #[default]
    OpenRouter,
    /// Canned in-character replies; no network.
    Placeholder,
}

/// Reply generation settings. Key: `api_key` in the file, else `PARLEY_LLM_API_KEY`, else `OPENROUTER_API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub provider: GenerationProvider,
    /// Base URL without trailing slash.
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::default(),
            api_url: OPENROUTER_API_BASE.to_string(),
            model: "google/gemini-2.5-flash".to_string(),
            temperature: 0.8,
            max_tokens: 150,
            api_key: None,
        }
    }
}

impl GenerationSettings {
    /// API key with fallback to environment variables.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("PARLEY_LLM_API_KEY").ok())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// Which speech output backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechProvider {
    /// OpenAI-compatible `/audio/speech`, falling back to captions on failure.
    #[default]
    OpenRouter,
    /// Captions only: the reply is shown for an estimated reading time.
    Caption,
}

/// Speech output settings. Key: `api_key` in the file, else `PARLEY_TTS_API_KEY`, else `OPENROUTER_API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub provider: SpeechProvider,
    pub api_url: String,
    pub model: String,
    pub voice: String,
    /// Player command that reads encoded audio on stdin.
    pub player: Vec<String>,
    /// Reading speed for the caption fallback.
    pub words_per_minute: u32,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            provider: SpeechProvider::default(),
            api_url: OPENAI_API_BASE.to_string(),
            model: "tts-1".to_string(),
            voice: "nova".to_string(),
            player: ["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet", "-"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            words_per_minute: 165,
            api_key: None,
        }
    }
}

impl SpeechSettings {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("PARLEY_TTS_API_KEY").ok())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// Cadence of the scripted transcription source (typed utterances replayed as speech).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub partial_interval_ms: u64,
    pub words_per_partial: usize,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            partial_interval_ms: 120,
            words_per_partial: 2,
        }
    }
}

impl ParleyConfig {
    /// Load config from file and environment. Precedence: env > `PARLEY_CONFIG` file (or `config/parley.toml`) > defaults.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var("PARLEY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(Path::new(&path))
    }

    /// Load from a specific TOML file (skipped if missing) plus `PARLEY__*` env overrides.
    pub fn load_from_path(path: &Path) -> CoreResult<Self> {
        let builder = config::Config::builder();
        let builder = if path.exists() {
            debug!(path = %path.display(), "loading parley config file");
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("PARLEY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: ParleyConfig = built.try_deserialize()?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write the current configuration as TOML (API keys are never written).
    pub fn save_to_path(&self, path: &Path) -> CoreResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// The persona as it should look at session start (and after a reset).
    pub fn initial_persona(&self) -> PersonaContext {
        self.persona
            .clone()
            .with_intensity(self.coordinator.baseline_intensity)
    }

    fn normalize(&mut self) {
        self.coordinator.baseline_intensity = self.coordinator.baseline_intensity.min(MAX_INTENSITY);
        self.persona.intensity = self.persona.intensity.min(MAX_INTENSITY);
        self.generation.api_url = self.generation.api_url.trim_end_matches('/').to_string();
        self.speech.api_url = self.speech.api_url.trim_end_matches('/').to_string();
    }

    fn validate(&self) -> CoreResult<()> {
        self.persona.validate()?;
        if self.transcription.words_per_partial == 0 {
            return Err(CoreError::Config(
                "transcription.words_per_partial must be at least 1".to_string(),
            ));
        }
        if self.speech.words_per_minute == 0 {
            return Err(CoreError::Config(
                "speech.words_per_minute must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
