use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::puzzle_config::Variant;
use crate::storage::{LocalStore, LEADERBOARD_KEY};

pub const TOP_N: usize = 5;

/// Which reconciliation strategy a deployment uses
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum LeaderboardMode {
    /// Best times kept in the local store
    #[default]
    Local,
    /// Ranking owned by the remote leaderboard API
    Remote,
}

/// A finished attempt to merge into the ranking
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub username: String,
    pub variant: Variant,
    pub time: Duration,
}

impl Completion {
    pub fn seconds(&self) -> f64 {
        self.time.as_secs_f64()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub username: String,
    #[serde(alias = "time")]
    pub best_time: f64,
    pub variant: Variant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub rank: usize,
    pub username: String,
    pub best_time: f64,
    pub is_current_user: bool,
}

/// "This attempt" vs "Your best", shown when the attempt did not improve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptComparison {
    pub this_attempt: f64,
    pub best: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Standing {
    pub rows: Vec<RankedRow>,
    /// None when ranking authority is remote
    pub personal_best: Option<bool>,
    pub comparison: Option<AttemptComparison>,
}

impl Standing {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub trait Reconciler: Send {
    /// Merge a completion and return the ranking to display
    fn reconcile(&mut self, completion: &Completion) -> Result<Standing>;
    /// Ranking without a new completion
    fn standings(&self, username: &str, variant: Variant) -> Result<Standing>;
}

pub type SharedReconciler = Arc<Mutex<Box<dyn Reconciler>>>;

/// Optimistic local ranking; one entry per username per variant
#[derive(Debug)]
pub struct LocalLeaderboard<S: LocalStore> {
    store: S,
    limit: usize,
}

impl<S: LocalStore> LocalLeaderboard<S> {
    pub fn new(store: S) -> Self {
        Self { store, limit: TOP_N }
    }

    pub fn with_limit(store: S, limit: usize) -> Self {
        Self { store, limit }
    }

    pub fn entries(&self) -> Result<Vec<LeaderboardEntry>> {
        Ok(self
            .store
            .get_json::<Vec<LeaderboardEntry>>(LEADERBOARD_KEY)?
            .unwrap_or_default())
    }

    /// Insert or improve the user's entry. Returns whether it is a personal best.
    pub fn record(&mut self, completion: &Completion) -> Result<bool> {
        let mut entries = self.entries()?;
        let secs = completion.seconds();
        let existing = entries
            .iter_mut()
            .find(|e| e.username == completion.username && e.variant == completion.variant);

        let personal_best = match existing {
            Some(entry) if secs < entry.best_time => {
                entry.best_time = secs;
                true
            }
            Some(_) => false,
            None => {
                entries.push(LeaderboardEntry {
                    username: completion.username.clone(),
                    best_time: secs,
                    variant: completion.variant,
                });
                true
            }
        };

        if personal_best {
            self.store.set_json(LEADERBOARD_KEY, &entries)?;
        }
        Ok(personal_best)
    }

    fn rank(&self, username: &str, variant: Variant, attempt: Option<f64>) -> Result<Standing> {
        let ranked: Vec<LeaderboardEntry> = self
            .entries()?
            .into_iter()
            .filter(|e| e.variant == variant)
            .sorted_by(|a, b| a.best_time.total_cmp(&b.best_time))
            .collect();

        let rows: Vec<RankedRow> = ranked
            .iter()
            .take(self.limit)
            .enumerate()
            .map(|(i, e)| RankedRow {
                rank: i + 1,
                username: e.username.clone(),
                best_time: e.best_time,
                is_current_user: e.username == username,
            })
            .collect();

        let own_best = ranked.iter().find(|e| e.username == username);
        let in_top = rows.iter().any(|r| r.is_current_user);
        let comparison = match (attempt, own_best) {
            (Some(this_attempt), Some(best)) if this_attempt > best.best_time || !in_top => {
                Some(AttemptComparison {
                    this_attempt,
                    best: best.best_time,
                })
            }
            _ => None,
        };

        Ok(Standing {
            rows,
            personal_best: None,
            comparison,
        })
    }
}

impl<S: LocalStore + Send> Reconciler for LocalLeaderboard<S> {
    fn reconcile(&mut self, completion: &Completion) -> Result<Standing> {
        let personal_best = self.record(completion)?;
        let mut standing = self.rank(
            &completion.username,
            completion.variant,
            Some(completion.seconds()),
        )?;
        standing.personal_best = Some(personal_best);
        Ok(standing)
    }

    fn standings(&self, username: &str, variant: Variant) -> Result<Standing> {
        self.rank(username, variant, None)
    }
}

#[derive(Debug, Deserialize)]
struct RemoteRow {
    username: String,
    best_time: f64,
}

/// Ranking fetched from `GET {api}/api/leaderboard?variant=..&limit=..`
#[derive(Debug, Clone)]
pub struct RemoteLeaderboard {
    client: reqwest::blocking::Client,
    base_url: String,
    limit: usize,
}

impl RemoteLeaderboard {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(8))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit: TOP_N,
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn fetch(&self, username: &str, variant: Variant) -> Result<Standing> {
        let url = format!("{}/api/leaderboard", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("variant", variant.as_str().to_string()),
                ("limit", self.limit.to_string()),
            ])
            .send()?;
        if !response.status().is_success() {
            return Err(Error::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        let rows: Vec<RemoteRow> = response.json()?;
        Ok(tag_remote_rows(rows, username))
    }
}

fn tag_remote_rows(rows: Vec<RemoteRow>, username: &str) -> Standing {
    Standing {
        rows: rows
            .into_iter()
            .enumerate()
            .map(|(i, r)| RankedRow {
                rank: i + 1,
                is_current_user: r.username == username,
                username: r.username,
                best_time: r.best_time,
            })
            .collect(),
        personal_best: None,
        comparison: None,
    }
}

impl Reconciler for RemoteLeaderboard {
    fn reconcile(&mut self, completion: &Completion) -> Result<Standing> {
        // the server records completions from the analytics stream
        self.fetch(&completion.username, completion.variant)
    }

    fn standings(&self, username: &str, variant: Variant) -> Result<Standing> {
        self.fetch(username, variant)
    }
}

/// Reconcile off the caller's thread; `done` receives the result or a display message.
pub fn reconcile_in_background<F>(reconciler: SharedReconciler, completion: Completion, done: F)
where
    F: FnOnce(std::result::Result<Standing, String>) + Send + 'static,
{
    thread::spawn(move || {
        let result = match reconciler.lock() {
            Ok(mut r) => r.reconcile(&completion).map_err(|e| e.to_string()),
            Err(_) => Err("leaderboard state poisoned".to_string()),
        };
        match &result {
            Ok(standing) => debug!(rows = standing.rows.len(), "leaderboard reconciled"),
            Err(e) => warn!(error = %e, "leaderboard reconciliation failed"),
        }
        done(result);
    });
}

/// Same as [`reconcile_in_background`] for a plain refresh
pub fn refresh_in_background<F>(
    reconciler: SharedReconciler,
    username: String,
    variant: Variant,
    done: F,
) where
    F: FnOnce(std::result::Result<Standing, String>) + Send + 'static,
{
    thread::spawn(move || {
        let result = match reconciler.lock() {
            Ok(r) => r.standings(&username, variant).map_err(|e| e.to_string()),
            Err(_) => Err("leaderboard state poisoned".to_string()),
        };
        if let Err(e) = &result {
            warn!(error = %e, "leaderboard refresh failed");
        }
        done(result);
    });
}
