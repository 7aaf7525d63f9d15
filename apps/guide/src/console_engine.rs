//! Speech engine that "speaks" by printing to stdout and holding for roughly
//! the time the utterance would take aloud.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::Language;
use speech_integration::{SpeechEngine, SpeechOutcome, SpeechRequest, Voice};
use tokio::sync::Notify;

const MIN_UTTERANCE: Duration = Duration::from_millis(250);
const MAX_UTTERANCE: Duration = Duration::from_secs(600);

pub struct ConsoleSpeechEngine {
    words_per_minute: f32,
    speaking: AtomicBool,
    interrupt: Notify,
}

impl ConsoleSpeechEngine {
    pub fn new(words_per_minute: f32) -> Self {
        Self {
            words_per_minute,
            speaking: AtomicBool::new(false),
            interrupt: Notify::new(),
        }
    }

    pub fn utterance_duration(&self, request: &SpeechRequest) -> Duration {
        let words = request.text.split_whitespace().count().max(1) as f32;
        let rate = if request.rate > 0.0 { request.rate } else { 1.0 };
        let seconds = words * 60.0 / (self.words_per_minute * rate);
        Duration::try_from_secs_f32(seconds)
            .unwrap_or(MAX_UTTERANCE)
            .clamp(MIN_UTTERANCE, MAX_UTTERANCE)
    }
}

/// Clears the speaking flag however `speak` ends, including when the
/// narration task is aborted mid-utterance.
struct SpeakingFlag<'a>(&'a AtomicBool);

impl<'a> SpeakingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SpeakingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechEngine for ConsoleSpeechEngine {
    async fn speak(&self, request: SpeechRequest) -> Result<SpeechOutcome> {
        let duration = self.utterance_duration(&request);
        let voice = request.voice_id.as_deref().unwrap_or("default");
        println!("[{} {}] {}", request.language, voice, request.text);

        let interrupted = self.interrupt.notified();
        let _speaking = SpeakingFlag::raise(&self.speaking);
        let outcome = tokio::select! {
            _ = tokio::time::sleep(duration) => SpeechOutcome::Done,
            _ = interrupted => SpeechOutcome::Stopped,
        };
        Ok(outcome)
    }

    async fn stop(&self) -> Result<()> {
        self.interrupt.notify_waiters();
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_speaking(&self) -> Result<bool> {
        Ok(self.speaking.load(Ordering::SeqCst))
    }

    async fn available_voices(&self) -> Result<Vec<Voice>> {
        Ok(Language::ALL
            .into_iter()
            .flat_map(|language| {
                let locale = language.speech_locale();
                [
                    Voice::new(
                        format!("{locale}-console-female"),
                        format!("{} Female", language.name()),
                        locale,
                    ),
                    Voice::new(
                        format!("{locale}-console-male"),
                        format!("{} Male", language.name()),
                        locale,
                    ),
                ]
            })
            .collect())
    }
}
