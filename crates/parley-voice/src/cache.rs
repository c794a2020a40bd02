//! Response cache keyed by request fingerprint.
//!
//! A fingerprint is the deterministic JSON serialization of the utterance text,
//! persona context and history at the moment a generation is issued. Entries are
//! created lazily on the first fragment and grow as fragments arrive, so an entry
//! left behind by a cancelled generation holds only what was received before the
//! cancel. Nothing is evicted until the session is reset.

use crate::conversation::HistoryMessage;
use crate::generation::GenerationRequest;
use parley_core::PersonaContext;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Deterministic cache key for a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

#[derive(Serialize)]
struct FingerprintKey<'a> {
    utterance: &'a str,
    persona: &'a PersonaContext,
    history: &'a [HistoryMessage],
}

impl Fingerprint {
    pub fn new(utterance: &str, persona: &PersonaContext, history: &[HistoryMessage]) -> Self {
        let key = FingerprintKey {
            utterance,
            persona,
            history,
        };
        // Plain structs of strings and integers always serialize.
        let encoded = serde_json::to_string(&key)
            .unwrap_or_else(|_| format!("{utterance}|{persona:?}|{history:?}"));
        Self(encoded)
    }

    /// Fingerprint of a request as it would be sent to the generation source.
    pub fn of(request: &GenerationRequest) -> Self {
        Self::new(&request.prompt, &request.persona, &request.history)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint -> generated text seen so far.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<Fingerprint, String>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&str> {
        self.entries.get(fingerprint).map(String::as_str)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Append a fragment to the entry for `fingerprint`, creating it if needed.
    pub fn append(&mut self, fingerprint: &Fingerprint, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.entries
            .entry(fingerprint.clone())
            .or_default()
            .push_str(fragment);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<HistoryMessage> {
        vec![HistoryMessage {
            role: "user".to_string(),
            content: "hello".to_string(),
        }]
    }

    #[test]
    fn fingerprint_depends_on_every_component() {
        let persona = PersonaContext::default();
        let base = Fingerprint::new("my room service is late", &persona, &history());

        assert_eq!(base, Fingerprint::new("my room service is late", &persona, &history()));
        assert_ne!(base, Fingerprint::new("my room service is very late", &persona, &history()));
        assert_ne!(
            base,
            Fingerprint::new("my room service is late", &persona.clone().with_intensity(2), &history())
        );
        assert_ne!(base, Fingerprint::new("my room service is late", &persona, &[]));
    }

    #[test]
    fn entries_grow_per_fragment_and_clear() {
        let fp = Fingerprint::new("x", &PersonaContext::default(), &[]);
        let mut cache = ResponseCache::new();
        assert!(!cache.contains(&fp));

        cache.append(&fp, "");
        assert!(!cache.contains(&fp), "empty fragments do not create entries");

        cache.append(&fp, "This is ");
        cache.append(&fp, "ridiculous.");
        assert_eq!(cache.get(&fp), Some("This is ridiculous."));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
