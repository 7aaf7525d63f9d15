use std::{fs, path::Path};

use guidance_core::GuidanceSettings;
use serde::Deserialize;
use shared::domain::Language;
use speech_integration::{DEFAULT_SPEECH_PITCH, DEFAULT_SPEECH_RATE, DEFAULT_VOICE_HINT};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub language: Language,
    pub speech_rate: f32,
    pub speech_pitch: f32,
    pub voice_hint: String,
    pub words_per_minute: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: Language::default(),
            speech_rate: DEFAULT_SPEECH_RATE,
            speech_pitch: DEFAULT_SPEECH_PITCH,
            voice_hint: DEFAULT_VOICE_HINT.into(),
            words_per_minute: 170.0,
        }
    }
}

impl Settings {
    pub fn guidance_settings(&self) -> GuidanceSettings {
        GuidanceSettings {
            rate: self.speech_rate,
            pitch: self.speech_pitch,
            voice_hint: self.voice_hint.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    language: Option<String>,
    speech_rate: Option<f32>,
    speech_pitch: Option<f32>,
    voice_hint: Option<String>,
    words_per_minute: Option<f32>,
}

pub fn load_settings(path: &Path) -> Settings {
    let var = |key: &str| std::env::var(key).ok();
    let mut settings = Settings {
        language: device_language(var),
        ..Settings::default()
    };

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, var);

    settings
}

/// Starting language from the process locale, in POSIX precedence order.
fn device_language(var: impl Fn(&str) -> Option<String>) -> Language {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .into_iter()
        .filter_map(|key| var(key))
        .find(|locale| !locale.trim().is_empty())
        .map(|locale| Language::from_locale(locale.trim()))
        .unwrap_or_default()
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<FileSettings>(raw) else {
        tracing::warn!("guide config is not valid TOML; using defaults");
        return;
    };

    if let Some(language) = file_cfg.language.as_deref().and_then(Language::from_code) {
        settings.language = language;
    }
    if let Some(rate) = file_cfg.speech_rate.filter(|v| *v > 0.0) {
        settings.speech_rate = rate;
    }
    if let Some(pitch) = file_cfg.speech_pitch.filter(|v| *v > 0.0) {
        settings.speech_pitch = pitch;
    }
    if let Some(hint) = file_cfg.voice_hint {
        settings.voice_hint = hint;
    }
    if let Some(wpm) = file_cfg.words_per_minute.filter(|v| *v > 0.0) {
        settings.words_per_minute = wpm;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("GUIDE_LANGUAGE").as_deref().and_then(Language::from_code) {
        settings.language = v;
    }
    if let Some(v) = var("APP__LANGUAGE").as_deref().and_then(Language::from_code) {
        settings.language = v;
    }

    if let Some(v) = positive_f32(var("APP__SPEECH_RATE")) {
        settings.speech_rate = v;
    }
    if let Some(v) = positive_f32(var("APP__SPEECH_PITCH")) {
        settings.speech_pitch = v;
    }
    if let Some(v) = var("APP__VOICE_HINT") {
        settings.voice_hint = v;
    }
    if let Some(v) = positive_f32(var("APP__WORDS_PER_MINUTE")) {
        settings.words_per_minute = v;
    }
}

fn positive_f32(raw: Option<String>) -> Option<f32> {
    raw?.trim().parse::<f32>().ok().filter(|v| *v > 0.0)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
