use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::app_dirs::AppDirs;
use crate::dashboard::DEFAULT_REFRESH;
use crate::error::Result;
use crate::identity::VariantPolicy;
use crate::leaderboard::{LeaderboardMode, TOP_N};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub leaderboard_mode: LeaderboardMode,
    pub leaderboard_limit: usize,
    /// Leaderboard and stats API
    pub api_url: String,
    /// Analytics capture host; events are only logged when unset
    pub events_url: Option<String>,
    pub events_api_key: Option<String>,
    /// Feature-flag service; `flag_value` is used when unset
    pub flags_url: Option<String>,
    pub flag_value: Option<String>,
    pub variant_policy: VariantPolicy,
    pub dashboard_refresh_secs: u64,
    pub puzzle_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            leaderboard_mode: LeaderboardMode::Local,
            leaderboard_limit: TOP_N,
            api_url: DEFAULT_API_URL.to_string(),
            events_url: None,
            events_api_key: None,
            flags_url: None,
            flag_value: None,
            variant_policy: VariantPolicy::Strict,
            dashboard_refresh_secs: DEFAULT_REFRESH.as_secs(),
            puzzle_file: None,
        }
    }
}

impl Config {
    pub fn dashboard_refresh(&self) -> Duration {
        Duration::from_secs(self.dashboard_refresh_secs.max(1))
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("abpuzzle_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    /// Missing or unreadable files yield the defaults
    fn load(&self) -> Config {
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable config");
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(cfg)?)?;
        Ok(())
    }
}
