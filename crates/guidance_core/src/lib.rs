use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ElementId, ElementKind, GuidancePhase, GuidanceSnapshot, Language, RegisteredElement},
    events::GuidanceEvent,
};
use speech_integration::{
    select_voice, SpeechEngine, SpeechError, SpeechOutcome, SpeechRequest, Voice,
    DEFAULT_SPEECH_PITCH, DEFAULT_SPEECH_RATE, DEFAULT_VOICE_HINT,
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod state;
pub use state::{AdvanceStep, GuidanceState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine used when no text-to-speech backend is wired in. Every utterance
/// fails, so guidance still walks the screen by skipping each element.
pub struct MissingSpeechEngine;

#[async_trait]
impl SpeechEngine for MissingSpeechEngine {
    async fn speak(&self, _request: SpeechRequest) -> Result<SpeechOutcome> {
        Err(anyhow!(SpeechError::Unavailable))
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn is_speaking(&self) -> Result<bool> {
        Ok(false)
    }

    async fn available_voices(&self) -> Result<Vec<Voice>> {
        Err(anyhow!(SpeechError::Unavailable))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceSettings {
    pub rate: f32,
    pub pitch: f32,
    pub voice_hint: String,
}

impl Default for GuidanceSettings {
    fn default() -> Self {
        Self {
            rate: DEFAULT_SPEECH_RATE,
            pitch: DEFAULT_SPEECH_PITCH,
            voice_hint: DEFAULT_VOICE_HINT.to_string(),
        }
    }
}

/// Screen-scoped voice guidance. UI elements register themselves, read
/// [`VoiceGuidance::snapshot`] or subscribe to events, and the screen drives
/// `start`/`advance`/`stop`. At most one narration task talks to the engine
/// at a time.
pub struct VoiceGuidance {
    engine: Arc<dyn SpeechEngine>,
    language: watch::Receiver<Language>,
    settings: GuidanceSettings,
    inner: Mutex<GuidanceInner>,
    events: broadcast::Sender<GuidanceEvent>,
}

struct GuidanceInner {
    state: GuidanceState,
    next_ticket: u64,
    narration: Option<Narration>,
}

impl GuidanceInner {
    fn owns(&self, ticket: u64) -> bool {
        self.narration
            .as_ref()
            .is_some_and(|narration| narration.ticket == ticket)
    }

    fn claim_narration(&mut self) -> (u64, Option<Narration>) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let previous = self.narration.replace(Narration { ticket, task: None });
        (ticket, previous)
    }
}

struct Narration {
    ticket: u64,
    task: Option<JoinHandle<()>>,
}

impl Narration {
    fn cancel(self) {
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

impl VoiceGuidance {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Arc<Self> {
        let (_, language) = watch::channel(Language::default());
        Self::new_with_dependencies(engine, language, GuidanceSettings::default())
    }

    pub fn new_with_dependencies(
        engine: Arc<dyn SpeechEngine>,
        language: watch::Receiver<Language>,
        settings: GuidanceSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            engine,
            language,
            settings,
            inner: Mutex::new(GuidanceInner {
                state: GuidanceState::new(),
                next_ticket: 0,
                narration: None,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuidanceEvent> {
        self.events.subscribe()
    }

    pub fn language(&self) -> Language {
        *self.language.borrow()
    }

    pub async fn register_element(
        &self,
        id: impl Into<ElementId>,
        text: impl Into<String>,
        kind: ElementKind,
    ) -> bool {
        let element = RegisteredElement::new(id, text, kind);
        let inserted = {
            let mut inner = self.inner.lock().await;
            inner.state.register(element.clone())
        };

        if inserted {
            self.emit(GuidanceEvent::ElementRegistered { element });
        } else {
            debug!(
                "voice guidance: duplicate registration ignored id={}",
                element.id
            );
        }
        inserted
    }

    /// Forgets the registered elements, e.g. when a new screen mounts.
    /// Ignored while guidance is running.
    pub async fn clear_elements(&self) -> bool {
        let cleared = self.inner.lock().await.state.clear_elements();
        if !cleared {
            warn!("voice guidance: refusing to clear elements while active");
        }
        cleared
    }

    pub async fn elements(&self) -> Vec<RegisteredElement> {
        self.inner.lock().await.state.elements().to_vec()
    }

    pub async fn snapshot(&self) -> GuidanceSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.state.is_active()
    }

    pub async fn is_waiting_for_input(&self) -> bool {
        self.inner.lock().await.state.is_waiting_for_input()
    }

    pub async fn current_element_id(&self) -> Option<ElementId> {
        self.inner.lock().await.state.current_element_id().cloned()
    }

    /// Activates guidance at the first registered element. Speech is left to
    /// the caller (`speak_current` or `speak`).
    pub async fn start(&self) -> GuidanceSnapshot {
        let (snapshot, interrupted) = {
            let mut inner = self.inner.lock().await;
            inner.state.start();
            (inner.state.snapshot(), inner.narration.take())
        };

        if let Some(narration) = interrupted {
            narration.cancel();
            self.silence_engine().await;
        }

        match &snapshot.current_element_id {
            Some(id) => info!(
                "voice guidance: started element={} language={}",
                id,
                self.language()
            ),
            None => warn!("voice guidance: start requested with no registered elements"),
        }

        self.emit(GuidanceEvent::StateChanged {
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    pub async fn stop(&self) {
        let (was_active, narration) = {
            let mut inner = self.inner.lock().await;
            (inner.state.stop(), inner.narration.take())
        };

        if let Some(narration) = narration {
            narration.cancel();
        }
        if let Err(err) = self.engine.stop().await {
            warn!(
                "voice guidance: {}",
                SpeechError::Cancel(err.to_string())
            );
        }

        if was_active {
            info!("voice guidance: stopped");
        }
        self.emit(GuidanceEvent::StateChanged {
            snapshot: GuidanceSnapshot::default(),
        });
    }

    /// Moves to the next element and announces it. Past the last element
    /// guidance stops. Does nothing while inactive.
    pub async fn advance(self: &Arc<Self>) -> AdvanceStep {
        let (step, snapshot, next, narration) = {
            let mut inner = self.inner.lock().await;
            let step = inner.state.advance();
            let (next, narration) = match (step, inner.state.current().cloned()) {
                (AdvanceStep::Moved(_), Some(element)) => {
                    let (ticket, previous) = inner.claim_narration();
                    (Some((ticket, element)), previous)
                }
                (AdvanceStep::Finished, _) => (None, inner.narration.take()),
                _ => (None, None),
            };
            (step, inner.state.snapshot(), next, narration)
        };

        match step {
            AdvanceStep::Idle => {
                debug!("voice guidance: advance ignored while inactive");
            }
            AdvanceStep::Finished => {
                if let Some(narration) = narration {
                    narration.cancel();
                }
                if let Err(err) = self.engine.stop().await {
                    warn!(
                        "voice guidance: {}",
                        SpeechError::Cancel(err.to_string())
                    );
                }
                info!("voice guidance: finished");
                self.emit(GuidanceEvent::StateChanged { snapshot });
                self.emit(GuidanceEvent::Finished);
            }
            AdvanceStep::Moved(index) => {
                debug!("voice guidance: advanced index={index}");
                self.emit(GuidanceEvent::StateChanged { snapshot });
                if let Some((ticket, element)) = next {
                    self.launch_narration(ticket, narration, Some(element.id), element.text)
                        .await;
                }
            }
        }
        step
    }

    /// Speaks `text`, interrupting whatever is being spoken. While guidance is
    /// in the speaking phase, finishing (or failing) the utterance advances
    /// to the next element.
    pub async fn speak(self: &Arc<Self>, text: impl Into<String>) {
        self.begin_narration(None, text.into()).await;
    }

    pub async fn speak_current(self: &Arc<Self>) -> bool {
        let claimed = {
            let mut inner = self.inner.lock().await;
            match inner.state.current().cloned() {
                Some(element) => Some((inner.claim_narration(), element)),
                None => None,
            }
        };
        match claimed {
            Some(((ticket, previous), element)) => {
                self.launch_narration(ticket, previous, Some(element.id), element.text)
                    .await;
                true
            }
            None => false,
        }
    }

    async fn begin_narration(self: &Arc<Self>, element_id: Option<ElementId>, text: String) {
        let (ticket, previous) = self.inner.lock().await.claim_narration();
        self.launch_narration(ticket, previous, element_id, text).await;
    }

    async fn launch_narration(
        self: &Arc<Self>,
        ticket: u64,
        previous: Option<Narration>,
        element_id: Option<ElementId>,
        text: String,
    ) {
        if let Some(previous) = previous {
            previous.cancel();
        }
        self.silence_engine().await;

        let guidance = Arc::clone(self);
        let task = tokio::spawn(async move {
            guidance.run_narration(ticket, element_id, text).await;
        });

        let mut inner = self.inner.lock().await;
        match inner.narration.as_mut() {
            Some(narration) if narration.ticket == ticket => narration.task = Some(task),
            // Superseded or stopped before the handle could be recorded.
            _ => task.abort(),
        }
    }

    async fn run_narration(&self, ticket: u64, mut element_id: Option<ElementId>, mut text: String) {
        loop {
            let request = self.build_request(&text).await;
            debug!(
                "voice guidance: speaking element={:?} locale={} voice={:?}",
                element_id, request.language, request.voice_id
            );
            self.emit(GuidanceEvent::UtteranceStarted {
                element_id: element_id.clone(),
                text: text.clone(),
            });

            let result = self.engine.speak(request).await;

            let mut inner = self.inner.lock().await;
            if !inner.owns(ticket) {
                return;
            }

            let proceed = match result {
                Ok(SpeechOutcome::Done) => {
                    self.emit(GuidanceEvent::UtteranceFinished {
                        element_id: element_id.clone(),
                    });
                    true
                }
                Ok(SpeechOutcome::Stopped) => {
                    debug!("voice guidance: utterance stopped element={element_id:?}");
                    false
                }
                Err(err) => {
                    let err = SpeechError::Utterance(err.to_string());
                    warn!("voice guidance: {err}; skipping element={element_id:?}");
                    self.emit(GuidanceEvent::SpeechFailed {
                        element_id: element_id.clone(),
                        reason: err.to_string(),
                    });
                    true
                }
            };

            if !proceed || inner.state.phase() != GuidancePhase::Speaking {
                inner.narration = None;
                return;
            }

            match inner.state.advance() {
                AdvanceStep::Moved(index) => {
                    self.emit(GuidanceEvent::StateChanged {
                        snapshot: inner.state.snapshot(),
                    });
                    let Some(next) = inner.state.current().cloned() else {
                        inner.narration = None;
                        return;
                    };
                    debug!("voice guidance: advanced index={index}");
                    element_id = Some(next.id);
                    text = next.text;
                }
                AdvanceStep::Finished => {
                    inner.narration = None;
                    info!("voice guidance: finished");
                    self.emit(GuidanceEvent::StateChanged {
                        snapshot: inner.state.snapshot(),
                    });
                    self.emit(GuidanceEvent::Finished);
                    return;
                }
                AdvanceStep::Idle => {
                    inner.narration = None;
                    return;
                }
            }
        }
    }

    async fn build_request(&self, text: &str) -> SpeechRequest {
        let language = self.language();
        let voice_id = match self.engine.available_voices().await {
            Ok(voices) => select_voice(
                &voices,
                language.speech_locale(),
                &self.settings.voice_hint,
            )
            .map(|voice| voice.identifier.clone()),
            Err(err) => {
                debug!(
                    "voice guidance: {}; using engine default voice",
                    SpeechError::VoiceLookup(err.to_string())
                );
                None
            }
        };

        SpeechRequest::new(text, language)
            .with_rate(self.settings.rate)
            .with_pitch(self.settings.pitch)
            .with_voice(voice_id)
    }

    async fn silence_engine(&self) {
        let speaking = self.engine.is_speaking().await.unwrap_or_else(|err| {
            warn!("voice guidance: speaking state unknown: {err}");
            true
        });
        if !speaking {
            return;
        }
        if let Err(err) = self.engine.stop().await {
            warn!(
                "voice guidance: {}",
                SpeechError::Cancel(err.to_string())
            );
        }
    }

    fn emit(&self, event: GuidanceEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
