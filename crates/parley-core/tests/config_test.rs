//! Config file loading: TOML sections override defaults, missing files fall back to defaults.

use parley_core::{GenerationProvider, ParleyConfig, SpeechProvider};
use tempfile::tempdir;

#[test]
fn toml_file_overrides_defaults() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("parley.toml");
    std::fs::write(
        &path,
        r#"
[coordinator]
debounce_ms = 500
baseline_intensity = 1

[generation]
provider = "placeholder"
api_url = "http://localhost:11434/v1/"

[speech]
provider = "caption"
words_per_minute = 200

[persona]
name = "Nora"
role = "Pharmacy Client"
mood = "Anxious"
scenario = "Regular medication is temporarily unavailable."
background = "You are an elderly patient."
"#,
    )
    .expect("write config");

    let cfg = ParleyConfig::load_from_path(&path).expect("load config");
    assert_eq!(cfg.coordinator.debounce_ms, 500);
    assert_eq!(cfg.coordinator.trigger_threshold_chars, 20);
    assert_eq!(cfg.generation.provider, GenerationProvider::Placeholder);
    assert_eq!(cfg.generation.api_url, "http://localhost:11434/v1");
    assert_eq!(cfg.speech.provider, SpeechProvider::Caption);
    assert_eq!(cfg.speech.words_per_minute, 200);
    assert_eq!(cfg.persona.name, "Nora");
    assert_eq!(cfg.initial_persona().intensity, 1);
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempdir().expect("tempdir");
    let cfg = ParleyConfig::load_from_path(&dir.path().join("absent.toml")).expect("load defaults");
    assert_eq!(cfg.coordinator.debounce_ms, 350);
    assert_eq!(cfg.persona.role, "Hotel Guest");
}

#[test]
fn invalid_persona_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("parley.toml");
    std::fs::write(&path, "[persona]\nname = \"\"\n").expect("write config");
    assert!(ParleyConfig::load_from_path(&path).is_err());
}

#[test]
fn saved_config_round_trips_without_keys() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("parley.toml");
    let mut cfg = ParleyConfig::default();
    cfg.generation.api_key = Some("sk-secret".to_string());
    cfg.save_to_path(&path).expect("save config");

    let written = std::fs::read_to_string(&path).expect("read back");
    assert!(!written.contains("sk-secret"));

    let loaded = ParleyConfig::load_from_path(&path).expect("reload");
    assert_eq!(loaded.persona, cfg.persona);
}
