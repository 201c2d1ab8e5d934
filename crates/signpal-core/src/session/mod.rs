//! Learning-session state machine.
//!
//! Pure and synchronous: the controller owns one [`Session`] and feeds it
//! commands, timers live outside.


use crate::alphabet::{label_matches, letter_at, ALPHABET, LAST_INDEX};
use crate::classifier::Classification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Feedback currently shown to the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feedback {
    /// Nothing shown (fresh letter, or session inactive)
    Hidden,
    /// Last sign matched the target with enough confidence
    Correct,
    /// Last sign was wrong, unconfident, or no hand was seen
    Incorrect,
}

impl Feedback {
    #[must_use]
    pub const fn is_visible(self) -> bool {
        !matches!(self, Self::Hidden)
    }

    #[must_use]
    pub const fn is_correct(self) -> bool {
        matches!(self, Self::Correct)
    }
}

/// Per-letter tally for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetterStats {
    pub letter: char,
    pub attempts: u32,
    pub incorrect: u32,
    pub no_signal: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LetterStats {
    fn new(letter: char) -> Self {
        Self {
            letter,
            attempts: 0,
            incorrect: 0,
            no_signal: 0,
            completed_at: None,
        }
    }
}

/// Result of submitting one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Session was inactive; nothing changed
    Ignored,
    /// Target matched; confirm with `generation` after the delay
    Correct { letter: char, generation: u64 },
    Incorrect,
}

/// Result of an advance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced { from: char, to: char },
    /// "Z" was confirmed; the session is now inactive
    Completed,
    /// Stale confirmation or inactive session
    Skipped,
}

/// Read-only view published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub active: bool,
    pub current_index: usize,
    pub target_letter: char,
    pub feedback_visible: bool,
    pub feedback_correct: bool,
    pub last_label: Option<String>,
    pub last_confidence: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct Session {
    match_threshold: f32,
    active: bool,
    current_index: usize,
    feedback: Feedback,
    last_result: Option<Classification>,
    generation: u64,
    session_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    stats: Vec<LetterStats>,
}

impl Session {
    #[must_use]
    pub fn new(match_threshold: f32) -> Self {
        Self {
            match_threshold,
            active: false,
            current_index: 0,
            feedback: Feedback::Hidden,
            last_result: None,
            generation: 0,
            session_id: None,
            started_at: None,
            stats: Vec::new(),
        }
    }

    /// Begin (or restart) at the first letter. Returns the new session id.
    pub fn start(&mut self) -> Uuid {
        let session_id = Uuid::new_v4();
        self.active = true;
        self.current_index = 0;
        self.feedback = Feedback::Hidden;
        self.last_result = None;
        self.generation += 1;
        self.session_id = Some(session_id);
        self.started_at = Some(Utc::now());
        self.stats = ALPHABET.iter().map(|&l| LetterStats::new(l)).collect();
        session_id
    }

    /// End the session. Returns whether it was active.
    ///
    /// `current_index` is kept so callers can see where the learner stopped.
    pub fn stop(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;
        self.feedback = Feedback::Hidden;
        self.last_result = None;
        self.generation += 1;
        was_active
    }

    /// Compare one classification against the target letter.
    pub fn submit(&mut self, result: &Classification) -> Verdict {
        if !self.active {
            return Verdict::Ignored;
        }
        let target = self.target_letter();
        let is_match = label_matches(&result.label, target);
        let is_confident = result.confidence > self.match_threshold;

        if let Some(stats) = self.stats.get_mut(self.current_index) {
            stats.attempts += 1;
            if result.is_no_signal() {
                stats.no_signal += 1;
            } else if !(is_match && is_confident) {
                stats.incorrect += 1;
            }
        }
        self.last_result = Some(result.clone());

        if is_match && is_confident {
            self.feedback = Feedback::Correct;
            Verdict::Correct {
                letter: target,
                generation: self.generation,
            }
        } else {
            if is_match {
                log::debug!(
                    "Confidence {:.2} not above threshold {:.2}",
                    result.confidence,
                    self.match_threshold
                );
            } else {
                log::debug!("'{}' does not match target '{target}'", result.label);
            }
            self.feedback = Feedback::Incorrect;
            Verdict::Incorrect
        }
    }

    /// Advance if a confirmation scheduled under `generation` for `letter` is
    /// still valid: same epoch, still active, still showing "correct", and
    /// the target has not moved.
    pub fn confirm_advance(&mut self, generation: u64, letter: char) -> AdvanceOutcome {
        let still_valid = generation == self.generation
            && self.active
            && self.feedback.is_correct()
            && self.target_letter() == letter;
        if still_valid {
            self.advance()
        } else {
            AdvanceOutcome::Skipped
        }
    }

    /// Move to the next letter, or finish after the last one.
    pub fn advance(&mut self) -> AdvanceOutcome {
        if !self.active {
            return AdvanceOutcome::Skipped;
        }
        if let Some(stats) = self.stats.get_mut(self.current_index) {
            stats.completed_at = Some(Utc::now());
        }
        if self.current_index < LAST_INDEX {
            let from = self.target_letter();
            self.current_index += 1;
            self.feedback = Feedback::Hidden;
            self.generation += 1;
            AdvanceOutcome::Advanced {
                from,
                to: self.target_letter(),
            }
        } else {
            self.stop();
            AdvanceOutcome::Completed
        }
    }

    #[must_use]
    pub fn target_letter(&self) -> char {
        letter_at(self.current_index).unwrap_or(ALPHABET[LAST_INDEX])
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub const fn feedback(&self) -> Feedback {
        self.feedback
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn last_result(&self) -> Option<&Classification> {
        self.last_result.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> &[LetterStats] {
        &self.stats
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            active: self.active,
            current_index: self.current_index,
            target_letter: self.target_letter(),
            feedback_visible: self.feedback.is_visible(),
            feedback_correct: self.feedback.is_correct(),
            last_label: self.last_result.as_ref().map(|r| r.label.clone()),
            last_confidence: self.last_result.as_ref().map(|r| r.confidence),
        }
    }
}
