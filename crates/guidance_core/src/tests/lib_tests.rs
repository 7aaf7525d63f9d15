use super::*;
use std::{collections::HashSet, time::Duration};
use tokio::sync::{mpsc, oneshot};

const WAIT: Duration = Duration::from_secs(2);

/// One call to `speak` that the test has to answer.
struct PendingUtterance {
    request: SpeechRequest,
    reply: oneshot::Sender<std::result::Result<SpeechOutcome, String>>,
}

/// Engine whose utterances stay open until the test replies to them.
struct ScriptedEngine {
    utterances: mpsc::UnboundedSender<PendingUtterance>,
    voices: Vec<Voice>,
    speaking: bool,
    fail_stop: bool,
    stop_calls: Arc<Mutex<u32>>,
}

impl ScriptedEngine {
    fn new() -> (Self, mpsc::UnboundedReceiver<PendingUtterance>) {
        let (utterances, rx) = mpsc::unbounded_channel();
        (
            Self {
                utterances,
                voices: Vec::new(),
                speaking: false,
                fail_stop: false,
                stop_calls: Arc::new(Mutex::new(0)),
            },
            rx,
        )
    }

    fn with_voices(mut self, voices: Vec<Voice>) -> Self {
        self.voices = voices;
        self
    }

    fn reporting_speaking(mut self) -> Self {
        self.speaking = true;
        self
    }

    fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    async fn speak(&self, request: SpeechRequest) -> Result<SpeechOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.utterances
            .send(PendingUtterance { request, reply })
            .map_err(|_| anyhow!("test dropped the utterance receiver"))?;
        match outcome.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(reason)) => Err(anyhow!(reason)),
            Err(_) => Ok(SpeechOutcome::Stopped),
        }
    }

    async fn stop(&self) -> Result<()> {
        *self.stop_calls.lock().await += 1;
        if self.fail_stop {
            return Err(anyhow!("audio session lost"));
        }
        Ok(())
    }

    async fn is_speaking(&self) -> Result<bool> {
        Ok(self.speaking)
    }

    async fn available_voices(&self) -> Result<Vec<Voice>> {
        Ok(self.voices.clone())
    }
}

/// Engine that finishes every utterance immediately, failing the texts it
/// was told to fail.
struct InstantEngine {
    failing_texts: HashSet<String>,
    spoken: Arc<Mutex<Vec<String>>>,
}

impl InstantEngine {
    fn new(failing_texts: &[&str]) -> Self {
        Self {
            failing_texts: failing_texts.iter().map(|text| text.to_string()).collect(),
            spoken: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SpeechEngine for InstantEngine {
    async fn speak(&self, request: SpeechRequest) -> Result<SpeechOutcome> {
        self.spoken.lock().await.push(request.text.clone());
        if self.failing_texts.contains(&request.text) {
            return Err(anyhow!("synthesis failed for {}", request.text));
        }
        Ok(SpeechOutcome::Done)
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn is_speaking(&self) -> Result<bool> {
        Ok(false)
    }

    async fn available_voices(&self) -> Result<Vec<Voice>> {
        Ok(Vec::new())
    }
}

async fn next_utterance(rx: &mut mpsc::UnboundedReceiver<PendingUtterance>) -> PendingUtterance {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("utterance in time")
        .expect("engine alive")
}

async fn wait_for_event<F>(rx: &mut broadcast::Receiver<GuidanceEvent>, mut predicate: F) -> GuidanceEvent
where
    F: FnMut(&GuidanceEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event stream open");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event in time")
}

async fn register_login_screen(guidance: &VoiceGuidance) {
    guidance
        .register_element("a", "Hello", ElementKind::Text)
        .await;
    guidance
        .register_element("b", "Name?", ElementKind::Input)
        .await;
}

#[tokio::test]
async fn speech_completion_moves_to_input_and_submit_finishes() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let guidance = VoiceGuidance::new(Arc::new(engine));
    let mut events = guidance.subscribe();
    register_login_screen(&guidance).await;

    let snapshot = guidance.start().await;
    assert!(snapshot.active);
    assert_eq!(snapshot.current_index, Some(0));
    assert!(!snapshot.waiting_for_input);

    assert!(guidance.speak_current().await);
    let hello = next_utterance(&mut utterances).await;
    assert_eq!(hello.request.text, "Hello");
    hello.reply.send(Ok(SpeechOutcome::Done)).expect("reply");

    let prompt = next_utterance(&mut utterances).await;
    assert_eq!(prompt.request.text, "Name?");
    let snapshot = guidance.snapshot().await;
    assert_eq!(snapshot.current_index, Some(1));
    assert!(snapshot.waiting_for_input);
    assert_eq!(snapshot.phase, GuidancePhase::WaitingForInput);

    prompt.reply.send(Ok(SpeechOutcome::Done)).expect("reply");
    wait_for_event(&mut events, |event| {
        matches!(
            event,
            GuidanceEvent::UtteranceFinished { element_id: Some(id) } if id.as_str() == "b"
        )
    })
    .await;
    assert_eq!(guidance.snapshot().await.current_index, Some(1));

    assert_eq!(guidance.advance().await, AdvanceStep::Finished);
    assert!(!guidance.is_active().await);
    assert_eq!(guidance.current_element_id().await, None);
}

#[tokio::test]
async fn speech_error_still_advances_to_inactive() {
    let engine = InstantEngine::new(&["Hi"]);
    let spoken = Arc::clone(&engine.spoken);
    let guidance = VoiceGuidance::new(Arc::new(engine));
    let mut events = guidance.subscribe();
    guidance
        .register_element("x", "Hi", ElementKind::Text)
        .await;

    guidance.start().await;
    guidance.speak_current().await;

    let failed = wait_for_event(&mut events, |event| {
        matches!(event, GuidanceEvent::SpeechFailed { .. })
    })
    .await;
    match failed {
        GuidanceEvent::SpeechFailed { element_id, reason } => {
            assert_eq!(element_id, Some(ElementId::from("x")));
            assert!(reason.contains("synthesis failed"), "reason: {reason}");
        }
        other => panic!("unexpected event {other:?}"),
    }
    wait_for_event(&mut events, |event| matches!(event, GuidanceEvent::Finished)).await;

    assert!(!guidance.is_active().await);
    assert_eq!(*spoken.lock().await, vec!["Hi".to_string()]);
}

#[tokio::test]
async fn missing_engine_skips_through_every_text_element() {
    let guidance = VoiceGuidance::new(Arc::new(MissingSpeechEngine));
    let mut events = guidance.subscribe();
    for id in ["title", "subtitle", "description"] {
        guidance.register_element(id, id, ElementKind::Text).await;
    }

    guidance.start().await;
    guidance.speak_current().await;
    wait_for_event(&mut events, |event| matches!(event, GuidanceEvent::Finished)).await;

    assert_eq!(guidance.snapshot().await, GuidanceSnapshot::default());
}

#[tokio::test]
async fn instant_engine_narrates_until_the_first_input() {
    let engine = InstantEngine::new(&[]);
    let spoken = Arc::clone(&engine.spoken);
    let guidance = VoiceGuidance::new(Arc::new(engine));
    let mut events = guidance.subscribe();
    guidance.register_element("title", "Your details", ElementKind::Text).await;
    guidance.register_element("subtitle", "Tell us about you", ElementKind::Text).await;
    guidance.register_element("name", "Name", ElementKind::Input).await;
    guidance.register_element("continue", "Continue", ElementKind::Text).await;

    guidance.start().await;
    guidance.speak_current().await;
    wait_for_event(&mut events, |event| {
        matches!(
            event,
            GuidanceEvent::UtteranceFinished { element_id: Some(id) } if id.as_str() == "name"
        )
    })
    .await;

    assert_eq!(
        *spoken.lock().await,
        vec!["Your details", "Tell us about you", "Name"]
    );
    assert_eq!(guidance.current_element_id().await, Some(ElementId::from("name")));
    assert!(guidance.is_waiting_for_input().await);

    guidance.advance().await;
    wait_for_event(&mut events, |event| matches!(event, GuidanceEvent::Finished)).await;
    assert_eq!(spoken.lock().await.last().map(String::as_str), Some("Continue"));
}

#[tokio::test]
async fn superseded_utterance_does_not_advance() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let guidance = VoiceGuidance::new(Arc::new(engine));
    for id in ["a", "b", "c"] {
        guidance.register_element(id, id, ElementKind::Text).await;
    }

    guidance.start().await;
    guidance.speak_current().await;
    let first = next_utterance(&mut utterances).await;
    assert_eq!(first.request.text, "a");

    assert_eq!(guidance.advance().await, AdvanceStep::Moved(1));
    let second = next_utterance(&mut utterances).await;
    assert_eq!(second.request.text, "b");

    let _ = first.reply.send(Ok(SpeechOutcome::Done));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(guidance.snapshot().await.current_index, Some(1));

    second.reply.send(Ok(SpeechOutcome::Done)).expect("reply");
    let third = next_utterance(&mut utterances).await;
    assert_eq!(third.request.text, "c");
    assert_eq!(guidance.snapshot().await.current_index, Some(2));
}

#[tokio::test]
async fn stop_cancels_narration_even_when_engine_stop_fails() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let engine = engine.failing_stop();
    let stop_calls = Arc::clone(&engine.stop_calls);
    let guidance = VoiceGuidance::new(Arc::new(engine));
    register_login_screen(&guidance).await;

    guidance.start().await;
    guidance.speak_current().await;
    let hello = next_utterance(&mut utterances).await;

    guidance.stop().await;
    assert_eq!(guidance.snapshot().await, GuidanceSnapshot::default());
    assert_eq!(*stop_calls.lock().await, 1);

    let _ = hello.reply.send(Ok(SpeechOutcome::Done));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!guidance.is_active().await);
    assert!(utterances.try_recv().is_err());
}

#[tokio::test]
async fn stop_while_inactive_is_harmless() {
    let guidance = VoiceGuidance::new(Arc::new(MissingSpeechEngine));
    guidance.stop().await;
    guidance.stop().await;
    assert_eq!(guidance.snapshot().await, GuidanceSnapshot::default());
    assert_eq!(guidance.advance().await, AdvanceStep::Idle);
}

#[tokio::test]
async fn start_without_elements_stays_inactive() {
    let guidance = VoiceGuidance::new(Arc::new(MissingSpeechEngine));
    let snapshot = guidance.start().await;
    assert!(!snapshot.active);
    assert_eq!(snapshot.current_index, None);
    assert!(!guidance.speak_current().await);
}

#[tokio::test]
async fn ad_hoc_speech_while_inactive_leaves_state_alone() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let guidance = VoiceGuidance::new(Arc::new(engine));
    let mut events = guidance.subscribe();
    register_login_screen(&guidance).await;

    guidance.speak("Please enter a valid email").await;
    let utterance = next_utterance(&mut utterances).await;
    utterance.reply.send(Ok(SpeechOutcome::Done)).expect("reply");
    wait_for_event(&mut events, |event| {
        matches!(event, GuidanceEvent::UtteranceFinished { element_id: None })
    })
    .await;

    assert_eq!(guidance.snapshot().await, GuidanceSnapshot::default());
}

#[tokio::test]
async fn ad_hoc_speech_while_speaking_advances_on_completion() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let guidance = VoiceGuidance::new(Arc::new(engine));
    register_login_screen(&guidance).await;

    guidance.start().await;
    guidance.speak("Welcome to Akewi").await;
    let intro = next_utterance(&mut utterances).await;
    assert_eq!(intro.request.text, "Welcome to Akewi");
    intro.reply.send(Ok(SpeechOutcome::Done)).expect("reply");

    let prompt = next_utterance(&mut utterances).await;
    assert_eq!(prompt.request.text, "Name?");
    assert!(guidance.is_waiting_for_input().await);
}

#[tokio::test]
async fn stopped_outcome_never_advances() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let guidance = VoiceGuidance::new(Arc::new(engine));
    let mut events = guidance.subscribe();
    register_login_screen(&guidance).await;

    guidance.start().await;
    guidance.speak_current().await;
    let hello = next_utterance(&mut utterances).await;
    hello.reply.send(Ok(SpeechOutcome::Stopped)).expect("reply");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(guidance.snapshot().await.current_index, Some(0));
    assert!(utterances.try_recv().is_err());
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, GuidanceEvent::UtteranceFinished { .. }));
    }
}

#[tokio::test]
async fn speaking_engine_is_stopped_before_next_utterance() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let engine = engine.reporting_speaking();
    let stop_calls = Arc::clone(&engine.stop_calls);
    let guidance = VoiceGuidance::new(Arc::new(engine));

    guidance.speak("first").await;
    let _first = next_utterance(&mut utterances).await;
    guidance.speak("second").await;
    let second = next_utterance(&mut utterances).await;

    assert_eq!(second.request.text, "second");
    assert_eq!(*stop_calls.lock().await, 2);
}

#[tokio::test]
async fn request_follows_language_and_voice_preference() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let engine = engine.with_voices(vec![
        Voice::new("en-male", "English Male", "en-GB"),
        Voice::new("en-female", "English Female", "en-GB"),
        Voice::new("yo-1", "Yoruba", "yo-NG"),
    ]);
    let (language_tx, language_rx) = watch::channel(Language::English);
    let settings = GuidanceSettings {
        rate: 0.7,
        ..GuidanceSettings::default()
    };
    let guidance = VoiceGuidance::new_with_dependencies(Arc::new(engine), language_rx, settings);

    guidance.speak("Continue").await;
    let english = next_utterance(&mut utterances).await;
    assert_eq!(english.request.language, "en-GB");
    assert_eq!(english.request.voice_id.as_deref(), Some("en-female"));
    assert_eq!(english.request.rate, 0.7);
    assert_eq!(english.request.pitch, DEFAULT_SPEECH_PITCH);

    language_tx.send(Language::Yoruba).expect("language receiver alive");
    guidance.speak("Tẹ̀síwájú").await;
    let yoruba = next_utterance(&mut utterances).await;
    assert_eq!(yoruba.request.language, "yo-NG");
    assert_eq!(yoruba.request.voice_id.as_deref(), Some("yo-1"));
    assert_eq!(guidance.language(), Language::Yoruba);
}

#[tokio::test]
async fn duplicate_registration_emits_once() {
    let guidance = VoiceGuidance::new(Arc::new(MissingSpeechEngine));
    let mut events = guidance.subscribe();

    assert!(guidance.register_element("name", "Name", ElementKind::Input).await);
    assert!(!guidance.register_element("name", "Full name", ElementKind::Text).await);

    let elements = guidance.elements().await;
    assert_eq!(elements, vec![RegisteredElement::input("name", "Name")]);

    let registered = events.try_recv().expect("registration event");
    assert!(matches!(registered, GuidanceEvent::ElementRegistered { .. }));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn clear_elements_only_when_inactive() {
    let guidance = VoiceGuidance::new(Arc::new(MissingSpeechEngine));
    register_login_screen(&guidance).await;
    guidance.start().await;

    assert!(!guidance.clear_elements().await);
    guidance.stop().await;
    assert!(guidance.clear_elements().await);
    assert!(guidance.elements().await.is_empty());
}

#[tokio::test]
async fn restart_interrupts_current_narration() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let guidance = VoiceGuidance::new(Arc::new(engine));
    for id in ["a", "b"] {
        guidance.register_element(id, id, ElementKind::Text).await;
    }

    guidance.start().await;
    guidance.speak_current().await;
    let first = next_utterance(&mut utterances).await;

    guidance.start().await;
    let _ = first.reply.send(Ok(SpeechOutcome::Done));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(guidance.snapshot().await.current_index, Some(0));
    assert!(utterances.try_recv().is_err());
}

#[tokio::test]
async fn completion_queued_behind_external_advance_moves_only_once() {
    let (engine, mut utterances) = ScriptedEngine::new();
    let guidance = VoiceGuidance::new(Arc::new(engine));
    for id in ["a", "b", "c"] {
        guidance.register_element(id, id, ElementKind::Text).await;
    }

    guidance.start().await;
    guidance.speak_current().await;
    let first = next_utterance(&mut utterances).await;

    // Queue the external advance first, then the completion of "a", so the
    // narration task takes the lock right after the advance releases it.
    let held = guidance.inner.lock().await;
    let advancing = tokio::spawn({
        let guidance = Arc::clone(&guidance);
        async move { guidance.advance().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.reply.send(Ok(SpeechOutcome::Done)).expect("reply");
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    assert_eq!(advancing.await.expect("join"), AdvanceStep::Moved(1));
    let second = next_utterance(&mut utterances).await;
    assert_eq!(second.request.text, "b");
    assert_eq!(guidance.snapshot().await.current_index, Some(1));
    assert!(utterances.try_recv().is_err());
}

#[tokio::test]
async fn failed_input_prompt_keeps_waiting_for_input() {
    let engine = InstantEngine::new(&["Name?"]);
    let guidance = VoiceGuidance::new(Arc::new(engine));
    let mut events = guidance.subscribe();
    register_login_screen(&guidance).await;

    guidance.start().await;
    guidance.speak_current().await;

    let failed = wait_for_event(&mut events, |event| {
        matches!(event, GuidanceEvent::SpeechFailed { .. })
    })
    .await;
    match failed {
        GuidanceEvent::SpeechFailed { element_id, .. } => {
            assert_eq!(element_id, Some(ElementId::from("b")));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let snapshot = guidance.snapshot().await;
    assert_eq!(snapshot.current_index, Some(1));
    assert!(snapshot.waiting_for_input);
    assert_eq!(snapshot.phase, GuidancePhase::WaitingForInput);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(
            event,
            GuidanceEvent::StateChanged { .. } | GuidanceEvent::Finished
        ));
    }
}
