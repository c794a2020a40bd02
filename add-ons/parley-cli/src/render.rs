//! Renders coordinator events as a running transcript on stdout.

use parley_voice::{CoordinatorEvent, SessionPhase, Speaker};
use std::io::Write;
use tokio::sync::broadcast;

/// Print events until the coordinator goes away.
pub async fn run(mut events: broadcast::Receiver<CoordinatorEvent>, persona: String) {
    loop {
        match events.recv().await {
            Ok(event) => render(&event, &persona),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Renderer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn render(event: &CoordinatorEvent, persona: &str) {
    let mut out = std::io::stdout().lock();
    let _ = match event {
        CoordinatorEvent::PhaseChanged { to, .. } => writeln!(out, "  [{}]", phase_label(*to)),
        CoordinatorEvent::PartialTranscript { text } => writeln!(out, "  … {}", text),
        CoordinatorEvent::GenerationStarted { cached: true, .. } => {
            writeln!(out, "  (reply from cache)")
        }
        CoordinatorEvent::ReplyFragment { text, .. } => write!(out, "{}", text),
        CoordinatorEvent::GenerationCancelled { .. } => writeln!(out, "\n  (reply cancelled)"),
        CoordinatorEvent::TurnAppended { turn } => match turn.speaker() {
            Speaker::User => writeln!(out, "\nyou: {}", turn.text()),
            Speaker::Agent => writeln!(out, "\n{}: {}", persona, turn.text()),
        },
        CoordinatorEvent::IntensityChanged { intensity } => {
            writeln!(out, "  (intensity {}/3)", intensity)
        }
        CoordinatorEvent::Error { message } => writeln!(out, "  ! {}", message),
        CoordinatorEvent::Reset => writeln!(out, "  (session reset)"),
        _ => Ok(()),
    };
    let _ = out.flush();
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Idle => "ready",
        SessionPhase::Listening => "listening",
        SessionPhase::Thinking => "thinking",
        SessionPhase::Speaking => "speaking",
    }
}
