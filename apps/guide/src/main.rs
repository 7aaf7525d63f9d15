use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use guidance_core::{MissingSpeechEngine, VoiceGuidance};
use shared::{
    domain::{GuidancePhase, Language},
    events::GuidanceEvent,
};
use speech_integration::SpeechEngine;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, watch},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod console_engine;
mod script;

use console_engine::ConsoleSpeechEngine;
use script::ScreenScript;

#[derive(Parser, Debug)]
#[command(name = "akewi-guide", about = "Walk a screen with spoken voice guidance")]
struct Args {
    /// Screen script (TOML) listing the elements to guide through.
    #[arg(long)]
    script: PathBuf,
    /// Narration language code (en or yo).
    #[arg(long)]
    language: Option<String>,
    #[arg(long, default_value = "guide.toml")]
    config: PathBuf,
    /// Print every guidance event as a JSON line.
    #[arg(long)]
    json_events: bool,
    /// Run without a speech engine; every element is skipped.
    #[arg(long)]
    silent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Quit,
    Next,
    Submit(String),
    Language(Option<Language>),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line {
        "q" | "quit" => Command::Quit,
        "n" | "next" => Command::Next,
        _ => match line.strip_prefix("lang ") {
            Some(code) => Command::Language(Language::from_code(code)),
            None => Command::Submit(line.to_string()),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(code) = args.language.as_deref() {
        match Language::from_code(code) {
            Some(language) => settings.language = language,
            None => warn!("unsupported language '{code}'; keeping {}", settings.language),
        }
    }

    let script = ScreenScript::load(&args.script)
        .with_context(|| format!("failed to load screen {}", args.script.display()))?;

    let engine: Arc<dyn SpeechEngine> = if args.silent {
        Arc::new(MissingSpeechEngine)
    } else {
        Arc::new(ConsoleSpeechEngine::new(settings.words_per_minute))
    };
    let (language_tx, language_rx) = watch::channel(settings.language);
    let guidance =
        VoiceGuidance::new_with_dependencies(engine, language_rx, settings.guidance_settings());
    let mut events = guidance.subscribe();

    let title = script.title().to_string();
    for element in script.elements {
        guidance
            .register_element(element.id, element.text, element.kind)
            .await;
    }

    info!(
        "guide: screen={} language={} ({})",
        title,
        settings.language,
        settings.language.local_name()
    );

    let snapshot = guidance.start().await;
    if !snapshot.active {
        println!("Nothing to guide: the screen registers no elements.");
        return Ok(());
    }
    guidance.speak_current().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if args.json_events {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    if render_event(&event) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("guide: dropped {skipped} guidance events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    guidance.stop().await;
                    break;
                };
                match parse_command(&line) {
                    Command::Quit => {
                        guidance.stop().await;
                        break;
                    }
                    Command::Next => {
                        guidance.advance().await;
                    }
                    Command::Submit(value) => {
                        if guidance.is_waiting_for_input().await {
                            if let Some(id) = guidance.current_element_id().await {
                                println!("  {id} = {value:?}");
                            }
                            guidance.advance().await;
                        }
                    }
                    Command::Language(Some(language)) => {
                        let _ = language_tx.send(language);
                        println!("  language set to {}", language.local_name());
                    }
                    Command::Language(None) => {
                        println!("  supported languages: en, yo");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Prints the human-readable side of an event. Returns `true` once guidance
/// has finished.
fn render_event(event: &GuidanceEvent) -> bool {
    if let Some(snapshot) = event.snapshot() {
        if snapshot.phase == GuidancePhase::WaitingForInput {
            if let Some(id) = &snapshot.current_element_id {
                println!("  > {id}: type a value and press enter");
            }
        }
        return false;
    }
    match event {
        GuidanceEvent::SpeechFailed { element_id, reason } => {
            match element_id {
                Some(id) => println!("  (could not speak {id}: {reason})"),
                None => println!("  (could not speak: {reason})"),
            }
            false
        }
        GuidanceEvent::Finished => {
            println!("Guidance finished.");
            true
        }
        _ => false,
    }
}
