// Library surface for the binary and for headless/integration tests.
pub mod app;
pub mod app_dirs;
pub mod attempt_log;
pub mod build_log;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod identity;
pub mod kde;
pub mod leaderboard;
pub mod puzzle;
pub mod puzzle_config;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod ui;
pub mod util;

pub use error::{Error, Result};
