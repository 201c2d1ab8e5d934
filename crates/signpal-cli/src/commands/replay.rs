/// Foreground learning session driven by a replay script
use anyhow::Result;
use signpal_core::{
    alphabet::ALPHABET,
    classifier::NO_SIGNAL_LABEL,
    config::Settings,
    replay::{Replay, ReplayScript},
    LetterStats, SessionController, SessionEvent, StopReason,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tabled::{Table, Tabled};
use tokio::sync::broadcast::error::RecvError;

pub struct ReplayOptions {
    pub script: PathBuf,
    pub json: bool,
    pub poll_interval_ms: Option<u64>,
    pub confirmation_delay_ms: Option<u64>,
}

#[derive(Tabled)]
struct LetterRow {
    #[tabled(rename = "Letter")]
    letter: char,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Wrong")]
    incorrect: u32,
    #[tabled(rename = "No Signal")]
    no_signal: u32,
    #[tabled(rename = "Passed")]
    passed: &'static str,
}

/// Per-letter results accumulated from session events.
struct Tally {
    letters: Vec<LetterStats>,
}

impl Tally {
    fn new() -> Self {
        Self {
            letters: ALPHABET
                .iter()
                .map(|&letter| LetterStats {
                    letter,
                    attempts: 0,
                    incorrect: 0,
                    no_signal: 0,
                    completed_at: None,
                })
                .collect(),
        }
    }

    fn letter_mut(&mut self, letter: char) -> Option<&mut LetterStats> {
        self.letters.iter_mut().find(|s| s.letter == letter)
    }

    fn record(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Started { .. } => *self = Self::new(),
            SessionEvent::Feedback {
                target,
                label,
                correct,
                ..
            } => {
                if let Some(stats) = self.letter_mut(*target) {
                    stats.attempts += 1;
                    if label == NO_SIGNAL_LABEL {
                        stats.no_signal += 1;
                    } else if !correct {
                        stats.incorrect += 1;
                    }
                }
            }
            SessionEvent::Advanced { from, .. } => {
                if let Some(stats) = self.letter_mut(*from) {
                    stats.completed_at = Some(chrono::Utc::now());
                }
            }
            SessionEvent::Completed { stats, .. } => self.letters.clone_from(stats),
            SessionEvent::NoSignal { .. }
            | SessionEvent::AdvanceSkipped { .. }
            | SessionEvent::Stopped { .. } => {}
        }
    }

    fn passed(&self) -> usize {
        self.letters
            .iter()
            .filter(|s| s.completed_at.is_some())
            .count()
    }

    /// Rows for every letter that saw at least one attempt.
    fn rows(&self) -> Vec<LetterRow> {
        self.letters
            .iter()
            .filter(|s| s.attempts > 0 || s.completed_at.is_some())
            .map(|s| LetterRow {
                letter: s.letter,
                attempts: s.attempts,
                incorrect: s.incorrect,
                no_signal: s.no_signal,
                passed: if s.completed_at.is_some() { "yes" } else { "no" },
            })
            .collect()
    }
}

fn describe_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Started { session_id } => {
            Some(format!("Session {session_id} started. Sign the letter A."))
        }
        SessionEvent::Feedback {
            target,
            label,
            confidence,
            correct,
        } => Some(format!(
            "[{target}] saw '{label}' ({confidence:.2}): {}",
            if *correct { "correct!" } else { "try again" }
        )),
        SessionEvent::NoSignal { reason } => Some(format!("    {reason}")),
        SessionEvent::Advanced { to, .. } => Some(format!("Next letter: {to}")),
        SessionEvent::AdvanceSkipped { .. } => None,
        SessionEvent::Completed { .. } => Some("Congratulations! Alphabet complete.".to_string()),
        SessionEvent::Stopped { reason } => Some(match reason {
            StopReason::Requested => "Session stopped.".to_string(),
            StopReason::Completed => "Session finished.".to_string(),
            StopReason::FramesUnavailable => "Session stopped: camera unavailable.".to_string(),
        }),
    }
}

fn load_settings(data_dir: &Path, options: &ReplayOptions) -> Result<Settings> {
    let mut settings = Settings::load(&Settings::path_in(data_dir))?;
    if let Some(ms) = options.poll_interval_ms {
        settings.poll_interval_ms = ms;
    }
    if let Some(ms) = options.confirmation_delay_ms {
        settings.confirmation_delay_ms = ms;
    }
    settings.validate()?;
    Ok(settings)
}

pub async fn run_replay(data_dir: &Path, options: ReplayOptions) -> Result<()> {
    let settings = load_settings(data_dir, &options)?;
    let replay = Arc::new(Replay::new(ReplayScript::load(&options.script)?));
    // Let a pending confirmation land before declaring the script finished.
    let grace = settings.confirmation_delay() + settings.poll_interval();

    let session = SessionController::spawn(settings, replay.clone(), replay.clone());
    let mut events = session.subscribe();
    session.start().await?;

    let mut tally = Tally::new();
    let mut exhausted_check = tokio::time::interval(Duration::from_millis(100));
    let mut exhausted_since: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("Missed {n} session events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                tally.record(&event);
                if options.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else if let Some(line) = describe_event(&event) {
                    println!("{line}");
                }
                if matches!(event, SessionEvent::Stopped { .. }) {
                    break;
                }
            }
            _ = exhausted_check.tick() => {
                if !replay.is_exhausted() {
                    continue;
                }
                let since = *exhausted_since.get_or_insert_with(tokio::time::Instant::now);
                if since.elapsed() >= grace {
                    log::info!("Replay script exhausted after {} entries", replay.consumed());
                    session.stop().await?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl-C, stopping session...");
                session.stop().await?;
            }
        }
    }

    if !options.json {
        let rows = tally.rows();
        if !rows.is_empty() {
            println!("\n{}", Table::new(rows));
        }
        println!("Letters passed: {}/{}", tally.passed(), ALPHABET.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(target: char, label: &str, correct: bool) -> SessionEvent {
        SessionEvent::Feedback {
            target,
            label: label.to_string(),
            confidence: 0.9,
            correct,
        }
    }

    #[test]
    fn test_tally_counts_attempts() {
        let mut tally = Tally::new();
        tally.record(&feedback('A', "B", false));
        tally.record(&feedback('A', NO_SIGNAL_LABEL, false));
        tally.record(&feedback('A', "A", true));
        tally.record(&SessionEvent::Advanced { from: 'A', to: 'B' });
        tally.record(&feedback('B', "B", false));

        let rows = tally.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].letter, 'A');
        assert_eq!(rows[0].attempts, 3);
        assert_eq!(rows[0].incorrect, 1);
        assert_eq!(rows[0].no_signal, 1);
        assert_eq!(rows[0].passed, "yes");
        assert_eq!(rows[1].passed, "no");
        assert_eq!(tally.passed(), 1);
    }

    #[test]
    fn test_tally_resets_on_start() {
        let mut tally = Tally::new();
        tally.record(&feedback('A', "B", false));
        tally.record(&SessionEvent::Started {
            session_id: uuid::Uuid::nil(),
        });
        assert!(tally.rows().is_empty());
    }

    #[test]
    fn test_describe_event_text() {
        assert_eq!(
            describe_event(&feedback('C', "c", true)).as_deref(),
            Some("[C] saw 'c' (0.90): correct!")
        );
        assert_eq!(
            describe_event(&SessionEvent::Advanced { from: 'C', to: 'D' }).as_deref(),
            Some("Next letter: D")
        );
        assert!(describe_event(&SessionEvent::AdvanceSkipped { letter: 'C' }).is_none());
        assert_eq!(
            describe_event(&SessionEvent::Stopped {
                reason: StopReason::FramesUnavailable
            })
            .as_deref(),
            Some("Session stopped: camera unavailable.")
        );
    }

    #[test]
    fn test_cli_overrides_apply() {
        let dir = tempfile::tempdir().unwrap();
        let options = ReplayOptions {
            script: PathBuf::from("unused.json"),
            json: false,
            poll_interval_ms: Some(50),
            confirmation_delay_ms: Some(100),
        };
        let settings = load_settings(dir.path(), &options).unwrap();
        assert_eq!(settings.poll_interval_ms, 50);
        assert_eq!(settings.confirmation_delay_ms, 100);

        let options = ReplayOptions {
            poll_interval_ms: Some(0),
            ..options
        };
        assert!(load_settings(dir.path(), &options).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.json");
        std::fs::write(
            &script,
            r#"{ "frames": [
                { "label": "A", "confidence": 0.9 },
                { "label": "A", "confidence": 0.9 },
                { "label": "B", "confidence": 0.2 }
            ] }"#,
        )
        .unwrap();
        let options = ReplayOptions {
            script,
            json: true,
            poll_interval_ms: None,
            confirmation_delay_ms: None,
        };
        run_replay(dir.path(), options).await.unwrap();
    }
}
