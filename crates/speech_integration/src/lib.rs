use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::Language;
use thiserror::Error;

/// Rate used for guidance narration; slightly slower than the engine default.
pub const DEFAULT_SPEECH_RATE: f32 = 0.85;
/// Pitch used for guidance narration; slightly raised for the feminine voice.
pub const DEFAULT_SPEECH_PITCH: f32 = 1.1;
pub const DEFAULT_VOICE_HINT: &str = "female";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub identifier: String,
    pub name: String,
    pub language: String,
}

impl Voice {
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            language: language.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub language: String,
    pub rate: f32,
    pub pitch: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, language: Language) -> Self {
        Self {
            text: text.into(),
            language: language.speech_locale().to_string(),
            rate: DEFAULT_SPEECH_RATE,
            pitch: DEFAULT_SPEECH_PITCH,
            voice_id: None,
        }
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_voice(mut self, voice_id: Option<String>) -> Self {
        self.voice_id = voice_id;
        self
    }
}

/// How an utterance ended when the engine did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    Done,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech engine is unavailable")]
    Unavailable,
    #[error("utterance failed: {0}")]
    Utterance(String),
    #[error("failed to cancel speech: {0}")]
    Cancel(String),
    #[error("failed to list voices: {0}")]
    VoiceLookup(String),
}

/// Text-to-speech backend. `speak` resolves once the utterance has finished
/// or was interrupted by `stop`.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn speak(&self, request: SpeechRequest) -> anyhow::Result<SpeechOutcome>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn is_speaking(&self) -> anyhow::Result<bool>;
    async fn available_voices(&self) -> anyhow::Result<Vec<Voice>>;
}

/// Picks the voice for `locale`: a voice whose name contains `hint` first,
/// then any voice of the language. `None` leaves the choice to the engine.
pub fn select_voice<'a>(voices: &'a [Voice], locale: &str, hint: &str) -> Option<&'a Voice> {
    let hint = hint.to_ascii_lowercase();
    let matches_language = |voice: &&Voice| voice.language.starts_with(locale);

    if !hint.is_empty() {
        if let Some(voice) = voices
            .iter()
            .filter(matches_language)
            .find(|voice| voice.name.to_ascii_lowercase().contains(&hint))
        {
            return Some(voice);
        }
    }

    voices.iter().find(matches_language)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
