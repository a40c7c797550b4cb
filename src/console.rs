use colored::*;
use stargazers::{AvatarState, LoadObserver, SessionOutcome, Stargazer};
use std::ops::Range;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// What the main loop needs to react to.
pub enum ConsoleEvent {
    Inserted(Vec<Stargazer>),
    SessionEnded { success: bool },
}

/// Prints the list as it grows and forwards the events that drive the
/// next step of the run.
pub struct ConsoleObserver {
    rows: usize,
    events: mpsc::UnboundedSender<ConsoleEvent>,
}

impl ConsoleObserver {
    pub fn new(rows: usize, events: mpsc::UnboundedSender<ConsoleEvent>) -> Self {
        Self { rows, events }
    }

    fn forward(&self, event: ConsoleEvent) {
        if self.events.send(event).is_err() {
            debug!("Console loop has exited");
        }
    }
}

impl LoadObserver for ConsoleObserver {
    fn viewport_rows(&self) -> usize {
        self.rows
    }

    fn on_list_cleared(&self) {
        debug!("List cleared");
    }

    fn on_batch_inserted(&self, stargazers: &[Stargazer], positions: Range<usize>) {
        for (index, stargazer) in positions.zip(stargazers) {
            println!("{:>5}  {}", (index + 1).to_string().dimmed(), stargazer.login.bold());
        }
        self.forward(ConsoleEvent::Inserted(stargazers.to_vec()));
    }

    fn on_session_ended(&self, outcome: &SessionOutcome) {
        match outcome {
            SessionOutcome::Success { .. } => println!("✅ {}", outcome.to_string().green()),
            SessionOutcome::Cancelled => println!("🛑 {}", outcome.to_string().yellow()),
            SessionOutcome::Error(e) => {
                eprintln!("❌ {}", e.to_string().red());
                if let Some(limit) = e.rate_limit() {
                    eprintln!("   Limit resets at {}", limit.reset_time.to_rfc3339().dimmed());
                }
            }
        }
        self.forward(ConsoleEvent::SessionEnded {
            success: outcome.is_success(),
        });
    }

    fn on_spinner_show(&self, after: Duration, message: &str) {
        debug!(after_secs = after.as_secs_f64(), "Showing spinner");
        eprintln!("{}", format!("⏳ {}...", message).dimmed());
    }

    fn on_spinner_message(&self, message: &str) {
        eprintln!("{}", format!("⏳ {}", message).dimmed());
    }

    fn on_spinner_hide(&self) {
        debug!("Hiding spinner");
    }

    fn on_avatar_updated(&self, login: &str, state: &AvatarState) {
        match state {
            AvatarState::Loaded(image) => println!(
                "       {} avatar {}x{} ({} bytes)",
                login.dimmed(),
                image.width,
                image.height,
                image.png.len()
            ),
            AvatarState::Errored => println!("       {} {}", login.dimmed(), "avatar failed".red()),
            _ => {}
        }
    }
}
