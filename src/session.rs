use std::time::{Duration, Instant};

use crate::puzzle_config::Variant;

/// Mutable record of the one live attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub variant: Variant,
    pub started_at: Option<Instant>,
    pub is_running: bool,
    // every submission, wrong and duplicate ones included
    pub guessed_words: Vec<String>,
    // duplicate-free, in the order found
    pub found_words: Vec<String>,
    pub completion_time: Option<Duration>,
}

impl SessionState {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            started_at: None,
            is_running: false,
            guessed_words: Vec::new(),
            found_words: Vec::new(),
            completion_time: None,
        }
    }

    /// Back to the idle defaults, keeping the variant
    pub fn clear(&mut self) {
        *self = Self::new(self.variant);
    }

    pub fn has_found(&self, word: &str) -> bool {
        self.found_words.iter().any(|w| w == word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_restores_defaults_but_keeps_variant() {
        let mut state = SessionState::new(Variant::B);
        state.started_at = Some(Instant::now());
        state.is_running = true;
        state.guessed_words.push("DATA".into());
        state.found_words.push("DATA".into());
        state.completion_time = Some(Duration::from_secs(3));

        state.clear();

        assert_eq!(state, SessionState::new(Variant::B));
    }
}
