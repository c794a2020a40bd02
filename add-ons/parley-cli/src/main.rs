//! Parley CLI
//!
//! Line-driven stand-in for the training screen: every typed line is "spoken"
//! to the persona through scripted transcription, and the coordinator's
//! transcript, streaming reply and phase are printed as they change.

mod render;

use anyhow::Context;
use parley_core::ParleyConfig;
use parley_voice::{
    create_generation, create_speech, create_transcription, Collaborators, CoordinatorConfig,
    CoordinatorHandle, SessionPhase, TurnCoordinator, VoiceResult,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Type what you would say to the guest and press enter.
  /stop      end the current utterance
  /cancel    cancel the reply being drafted
  /hush      stop the reply being spoken
  /escalate  make the guest angrier
  /reset     start over
  /clear     dismiss the last error
  /status    print the session state as JSON
  /quit      leave";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[parley] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ParleyConfig::load().context("loading Parley configuration")?;
    let transcription = create_transcription(&config.transcription);
    let collaborators = Collaborators {
        transcription: transcription.clone(),
        generation: create_generation(&config.generation).context("building generation")?,
        speech: create_speech(&config.speech).context("building speech output")?,
    };
    let handle = TurnCoordinator::spawn(CoordinatorConfig::from(&config), collaborators);

    let persona = config.persona.name.clone();
    tokio::spawn(render::run(handle.events(), persona.clone()));

    println!(
        "{} ({}) is {}. Scenario: {}",
        persona,
        config.persona.role,
        config.persona.mood.to_lowercase(),
        config.persona.scenario
    );
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                let result = if line.starts_with('/') {
                    command(&handle, line).await
                } else if matches!(
                    handle.snapshot().phase,
                    SessionPhase::Listening | SessionPhase::Thinking
                ) {
                    println!("  (still on the last turn; /stop or /cancel first)");
                    Ok(())
                } else {
                    transcription.queue_utterance(line);
                    handle.start_recording().await
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Command rejected");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; leaving session");
                break;
            }
        }
    }

    handle.reset().await.ok();
    Ok(())
}

async fn command(handle: &CoordinatorHandle, line: &str) -> VoiceResult<()> {
    match line {
        "/stop" => handle.stop_recording().await,
        "/cancel" => handle.cancel_generation().await,
        "/hush" => handle.stop_speech().await,
        "/escalate" => handle.escalate().await,
        "/reset" => handle.reset().await,
        "/clear" => handle.clear_error().await,
        "/status" => {
            match serde_json::to_string_pretty(&handle.snapshot()) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!(error = %e, "Could not render status"),
            }
            Ok(())
        }
        _ => {
            println!("{}", HELP);
            Ok(())
        }
    }
}
