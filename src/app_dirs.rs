use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    /// Directory for the local store, attempt log and log file
    pub fn state_dir() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            Some(
                PathBuf::from(home)
                    .join(".local")
                    .join("state")
                    .join("abpuzzle"),
            )
        } else {
            ProjectDirs::from("", "", "abpuzzle").map(|proj_dirs| proj_dirs.data_local_dir().into())
        }
    }

    pub fn store_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("store.db"))
    }

    pub fn attempt_log_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("attempts.csv"))
    }

    pub fn log_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("abpuzzle.log"))
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "abpuzzle").map(|pd| pd.config_dir().join("config.json"))
    }
}
