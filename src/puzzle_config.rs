use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

/// One of the two experiment arms
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum_macros::Display,
)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::A, Variant::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

/// Letters, target words and difficulty for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleConfig {
    pub letters: Vec<char>,
    pub target_words: Vec<String>,
    pub target_count: usize,
    pub difficulty: u8,
}

impl PuzzleConfig {
    pub fn is_target(&self, word: &str) -> bool {
        self.target_words.iter().any(|w| w == word)
    }

    fn validate(&mut self, variant: Variant) -> Result<()> {
        for word in self.target_words.iter_mut() {
            *word = word.trim().to_uppercase();
        }
        if self.target_words.iter().any(|w| w.is_empty()) {
            return Err(Error::InvalidPuzzle(format!(
                "variant {variant} has an empty target word"
            )));
        }
        if self.target_count == 0 || self.target_count > self.target_words.len() {
            return Err(Error::InvalidPuzzle(format!(
                "variant {variant} needs {} words but only lists {}",
                self.target_count,
                self.target_words.len()
            )));
        }
        Ok(())
    }
}

/// Static variant -> puzzle mapping, immutable after load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleCatalog {
    puzzles: BTreeMap<Variant, PuzzleConfig>,
}

impl PuzzleCatalog {
    pub fn builtin() -> Self {
        let mut puzzles = BTreeMap::new();
        puzzles.insert(
            Variant::A,
            PuzzleConfig {
                letters: "MATHEMATICSLOW".chars().collect(),
                target_words: vec!["MATH".into(), "THEM".into(), "MACE".into()],
                target_count: 3,
                difficulty: 3,
            },
        );
        puzzles.insert(
            Variant::B,
            PuzzleConfig {
                letters: "COMPUTERSCIENCEDATA".chars().collect(),
                target_words: vec![
                    "COMP".into(),
                    "PURE".into(),
                    "ENCE".into(),
                    "DATA".into(),
                ],
                target_count: 4,
                difficulty: 5,
            },
        );
        Self { puzzles }
    }

    /// Load a catalog from JSON (`{"A": {...}, "B": {...}}`); both variants are required
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut puzzles: BTreeMap<Variant, PuzzleConfig> = serde_json::from_str(raw)?;
        for variant in Variant::ALL {
            let config = puzzles.get_mut(&variant).ok_or_else(|| {
                Error::InvalidPuzzle(format!("missing puzzle for variant {variant}"))
            })?;
            config.validate(variant)?;
        }
        Ok(Self { puzzles })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn get(&self, variant: Variant) -> &PuzzleConfig {
        // both variants are guaranteed present by the constructors
        &self.puzzles[&variant]
    }
}

impl Default for PuzzleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn builtin_catalog_matches_experiment() {
        let catalog = PuzzleCatalog::builtin();
        let a = catalog.get(Variant::A);
        assert_eq!(a.letters.len(), 14);
        assert_eq!(a.target_count, 3);
        assert!(a.is_target("MACE"));

        let b = catalog.get(Variant::B);
        assert_eq!(b.target_count, 4);
        assert_eq!(b.difficulty, 5);
        assert!(!b.is_target("MATH"));
    }

    #[test]
    fn from_json_normalizes_words() {
        let raw = r#"{
            "A": {"letters": ["A","B"], "target_words": [" ab "], "target_count": 1, "difficulty": 1},
            "B": {"letters": ["C"], "target_words": ["c"], "target_count": 1, "difficulty": 2}
        }"#;
        let catalog = PuzzleCatalog::from_json(raw).unwrap();
        assert_eq!(catalog.get(Variant::A).target_words, vec!["AB".to_string()]);
        assert_eq!(catalog.get(Variant::B).target_words, vec!["C".to_string()]);
    }

    #[test]
    fn from_json_rejects_missing_variant() {
        let raw = r#"{"A": {"letters": [], "target_words": ["X"], "target_count": 1, "difficulty": 1}}"#;
        assert_matches!(PuzzleCatalog::from_json(raw), Err(Error::InvalidPuzzle(_)));
    }

    #[test]
    fn from_json_rejects_unreachable_target_count() {
        let raw = r#"{
            "A": {"letters": [], "target_words": ["X"], "target_count": 2, "difficulty": 1},
            "B": {"letters": [], "target_words": ["Y"], "target_count": 1, "difficulty": 1}
        }"#;
        assert_matches!(PuzzleCatalog::from_json(raw), Err(Error::InvalidPuzzle(_)));
    }

    #[test]
    fn variant_display() {
        assert_eq!(Variant::A.to_string(), "A");
        assert_eq!(Variant::B.as_str(), "B");
    }
}
