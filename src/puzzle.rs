use std::time::{Duration, Instant};

use tracing::debug;

use crate::puzzle_config::{PuzzleConfig, Variant};
use crate::session::SessionState;

/// Hard cap on one attempt
pub const CHALLENGE_DURATION: Duration = Duration::from_secs(60);
/// Countdown cadence; divides the cap evenly
pub const TICK_RATE_MS: u64 = 100;
/// How long a rejected guess stays flagged for the UI
pub const REJECT_FLASH: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Not running; nothing recorded
    Ignored,
    /// Blank after normalization
    Empty,
    /// New target word found
    Accepted(String),
    /// Wrong or already found
    Rejected(String),
    /// Last target word found
    Completed(Duration),
    /// Arrived at or after the cap; the attempt failed instead
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ignored,
    Countdown(Duration),
    Failed,
}

/// Lifecycle facts for the tracker, drained by the owner of the puzzle
#[derive(Debug, Clone, PartialEq)]
pub enum PuzzleEvent {
    Started {
        difficulty: u8,
    },
    Completed {
        time: Duration,
        found: usize,
        guesses: usize,
    },
    Failed {
        found: usize,
        guesses: usize,
    },
    Repeated,
}

/// Timed word-search attempt for a single variant
#[derive(Debug)]
pub struct Puzzle {
    config: PuzzleConfig,
    pub session_state: SessionState,
    phase: Phase,
    remaining: Duration,
    rejected_at: Option<Instant>,
    events: Vec<PuzzleEvent>,
}

impl Puzzle {
    pub fn new(variant: Variant, config: PuzzleConfig) -> Self {
        Self {
            config,
            session_state: SessionState::new(variant),
            phase: Phase::Idle,
            remaining: CHALLENGE_DURATION,
            rejected_at: None,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &PuzzleConfig {
        &self.config
    }

    pub fn variant(&self) -> Variant {
        self.session_state.variant
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn has_finished(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Failed)
    }

    pub fn start(&mut self) -> bool {
        self.start_at(Instant::now())
    }

    /// Idle -> Running. Returns false when not idle.
    pub fn start_at(&mut self, now: Instant) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.session_state.clear();
        self.session_state.started_at = Some(now);
        self.session_state.is_running = true;
        self.remaining = CHALLENGE_DURATION;
        self.rejected_at = None;
        self.phase = Phase::Running;
        self.events.push(PuzzleEvent::Started {
            difficulty: self.config.difficulty,
        });
        debug!(variant = %self.variant(), "puzzle started");
        true
    }

    pub fn on_tick(&mut self) -> TickOutcome {
        self.on_tick_at(Instant::now())
    }

    /// Recompute the countdown from the real elapsed time; fail at the cap.
    pub fn on_tick_at(&mut self, now: Instant) -> TickOutcome {
        if self.phase != Phase::Running {
            return TickOutcome::Ignored;
        }
        let elapsed = self.elapsed_at(now);
        if elapsed >= CHALLENGE_DURATION {
            self.fail();
            return TickOutcome::Failed;
        }
        self.remaining = CHALLENGE_DURATION - elapsed;
        TickOutcome::Countdown(self.remaining)
    }

    pub fn submit_word(&mut self, raw: &str) -> SubmitOutcome {
        self.submit_word_at(raw, Instant::now())
    }

    pub fn submit_word_at(&mut self, raw: &str, now: Instant) -> SubmitOutcome {
        if self.phase != Phase::Running {
            return SubmitOutcome::Ignored;
        }
        // the cap holds even when no tick has fired since it passed
        if self.elapsed_at(now) >= CHALLENGE_DURATION {
            self.fail();
            return SubmitOutcome::Expired;
        }
        let word = raw.trim().to_uppercase();
        if word.is_empty() {
            return SubmitOutcome::Empty;
        }

        self.session_state.guessed_words.push(word.clone());

        if !self.config.is_target(&word) || self.session_state.has_found(&word) {
            self.rejected_at = Some(now);
            return SubmitOutcome::Rejected(word);
        }

        self.session_state.found_words.push(word.clone());
        if self.session_state.found_words.len() >= self.config.target_count {
            let time = self.elapsed_at(now);
            self.complete(time);
            return SubmitOutcome::Completed(time);
        }
        SubmitOutcome::Accepted(word)
    }

    /// Any state -> Idle. `is_repeat` marks an explicit "try again".
    pub fn reset(&mut self, is_repeat: bool) {
        self.session_state.clear();
        self.phase = Phase::Idle;
        self.remaining = CHALLENGE_DURATION;
        self.rejected_at = None;
        if is_repeat {
            self.events.push(PuzzleEvent::Repeated);
        }
    }

    fn complete(&mut self, time: Duration) {
        self.session_state.is_running = false;
        self.session_state.completion_time = Some(time);
        self.phase = Phase::Completed;
        self.events.push(PuzzleEvent::Completed {
            time,
            found: self.session_state.found_words.len(),
            guesses: self.session_state.guessed_words.len(),
        });
        debug!(variant = %self.variant(), ?time, "puzzle completed");
    }

    fn fail(&mut self) {
        self.session_state.is_running = false;
        self.session_state.completion_time = Some(CHALLENGE_DURATION);
        self.remaining = Duration::ZERO;
        self.phase = Phase::Failed;
        self.events.push(PuzzleEvent::Failed {
            found: self.session_state.found_words.len(),
            guesses: self.session_state.guessed_words.len(),
        });
        debug!(variant = %self.variant(), "puzzle failed");
    }

    /// Pending lifecycle events, oldest first
    pub fn drain_events(&mut self) -> Vec<PuzzleEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match (self.session_state.completion_time, self.session_state.started_at) {
            (Some(frozen), _) => frozen,
            (None, Some(start)) => now.saturating_duration_since(start),
            (None, None) => Duration::ZERO,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn found_count(&self) -> usize {
        self.session_state.found_words.len()
    }

    pub fn guess_count(&self) -> usize {
        self.session_state.guessed_words.len()
    }

    pub fn target_count(&self) -> usize {
        self.config.target_count
    }

    pub fn completion_time(&self) -> Option<Duration> {
        self.session_state.completion_time
    }

    pub fn is_rejecting_at(&self, now: Instant) -> bool {
        self.rejected_at
            .is_some_and(|at| now.saturating_duration_since(at) < REJECT_FLASH)
    }
}
