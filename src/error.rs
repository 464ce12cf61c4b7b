use thiserror::Error;

/// Errors surfaced by the puzzle library.
///
/// Wrong guesses are not errors; see [`crate::puzzle::SubmitOutcome`].
#[derive(Debug, Error)]
pub enum Error {
    /// The experiment flag could not be turned into a variant.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response from {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid puzzle configuration: {0}")]
    InvalidPuzzle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
