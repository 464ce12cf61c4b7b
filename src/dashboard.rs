use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::kde::{gaussian_kde, DEFAULT_RESOLUTION};
use crate::puzzle_config::Variant;

pub const RECENT_COMPLETIONS_LIMIT: usize = 50;
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariantStats {
    pub variant: Variant,
    pub avg_completion_time: f64,
    #[serde(default)]
    pub completions: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Comparison {
    pub variant_a_avg: f64,
    pub variant_a_completions: u64,
    pub variant_b_avg: f64,
    pub variant_b_completions: u64,
    /// positive when B takes longer
    pub percentage_difference: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunnelStage {
    pub variant: Variant,
    pub stage: String,
    pub stage_order: u32,
    pub event_count: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TimeDistribution {
    #[serde(default)]
    pub variant_a_times: Vec<f64>,
    #[serde(default)]
    pub variant_b_times: Vec<f64>,
}

/// Everything one refresh cycle fetched
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSnapshot {
    pub stats: Vec<VariantStats>,
    pub comparison: Comparison,
    pub funnel: Vec<FunnelStage>,
    pub recent_completions: Vec<Map<String, Value>>,
    pub distribution: TimeDistribution,
}

/// Read side of the analytics backend
pub trait StatsApi: Send + Sync {
    fn variant_stats(&self) -> Result<Vec<VariantStats>>;
    fn comparison(&self) -> Result<Comparison>;
    fn funnel(&self) -> Result<Vec<FunnelStage>>;
    fn recent_completions(&self, limit: usize) -> Result<Vec<Map<String, Value>>>;
    fn time_distribution(&self) -> Result<TimeDistribution>;
}

impl<T: StatsApi + ?Sized> StatsApi for Arc<T> {
    fn variant_stats(&self) -> Result<Vec<VariantStats>> {
        (**self).variant_stats()
    }

    fn comparison(&self) -> Result<Comparison> {
        (**self).comparison()
    }

    fn funnel(&self) -> Result<Vec<FunnelStage>> {
        (**self).funnel()
    }

    fn recent_completions(&self, limit: usize) -> Result<Vec<Map<String, Value>>> {
        (**self).recent_completions(limit)
    }

    fn time_distribution(&self) -> Result<TimeDistribution> {
        (**self).time_distribution()
    }
}

#[derive(Debug, Clone)]
pub struct HttpStatsApi {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpStatsApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(8))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            return Err(Error::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response.json()?)
    }
}

impl StatsApi for HttpStatsApi {
    fn variant_stats(&self) -> Result<Vec<VariantStats>> {
        self.get_json("/api/variant-stats")
    }

    fn comparison(&self) -> Result<Comparison> {
        self.get_json("/api/comparison")
    }

    fn funnel(&self) -> Result<Vec<FunnelStage>> {
        self.get_json("/api/conversion-funnel")
    }

    fn recent_completions(&self, limit: usize) -> Result<Vec<Map<String, Value>>> {
        self.get_json(&format!("/api/recent-completions?limit={limit}"))
    }

    fn time_distribution(&self) -> Result<TimeDistribution> {
        self.get_json("/api/time-distribution")
    }
}

fn joined<T>(handle: thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| Error::Io(std::io::Error::other("stats fetch panicked")))?
}

/// Run the five fetches concurrently; the first failure fails the whole cycle.
pub fn fetch_snapshot(api: &dyn StatsApi) -> Result<DashboardSnapshot> {
    thread::scope(|s| {
        let stats = s.spawn(|| api.variant_stats());
        let comparison = s.spawn(|| api.comparison());
        let funnel = s.spawn(|| api.funnel());
        let recent = s.spawn(|| api.recent_completions(RECENT_COMPLETIONS_LIMIT));
        let distribution = s.spawn(|| api.time_distribution());

        // join all before propagating so no fetch outlives the cycle
        let (stats, comparison, funnel, recent, distribution) = (
            joined(stats),
            joined(comparison),
            joined(funnel),
            joined(recent),
            joined(distribution),
        );
        Ok(DashboardSnapshot {
            stats: stats?,
            comparison: comparison?,
            funnel: funnel?,
            recent_completions: recent?,
            distribution: distribution?,
        })
    })
}

/// Background refresh loop. Dropping the handle cancels it; no callback fires afterwards.
pub struct DashboardPoller {
    stopped: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DashboardPoller {
    /// Poll now and then every `interval`, on a fixed schedule regardless of failures.
    pub fn spawn<A, F>(api: A, interval: Duration, mut on_result: F) -> Self
    where
        A: StatsApi + 'static,
        F: FnMut(std::result::Result<DashboardSnapshot, String>) + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let flag = Arc::clone(&stopped);

        let handle = thread::spawn(move || {
            let mut next = Instant::now();
            loop {
                let result = fetch_snapshot(&api).map_err(|e| e.to_string());
                if let Err(e) = &result {
                    warn!(error = %e, "dashboard refresh failed");
                }
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                on_result(result);

                next += interval;
                let wait = next.saturating_duration_since(Instant::now());
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("dashboard poller stopped");
        });

        Self {
            stopped,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop and wait for the worker to exit
    pub fn stop(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn cancel(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_tx.take();
    }
}

impl Drop for DashboardPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Headline numbers and verdict
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonSummary {
    pub a_avg: f64,
    pub a_count: u64,
    pub b_avg: f64,
    pub b_count: u64,
    pub diff_label: String,
    pub status: &'static str,
}

impl From<&Comparison> for ComparisonSummary {
    fn from(c: &Comparison) -> Self {
        let diff = c.percentage_difference;
        let status = if diff > 0.0 {
            "Variant B seems to be harder"
        } else if diff < 0.0 {
            "Variant A seems to be harder"
        } else {
            "Both variants are equal"
        };
        Self {
            a_avg: c.variant_a_avg,
            a_count: c.variant_a_completions,
            b_avg: c.variant_b_avg,
            b_count: c.variant_b_completions,
            diff_label: format!("{}{}%", if diff > 0.0 { "+" } else { "" }, diff),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CompletionTable {
    /// Columns come from the first row, in its key order
    pub fn from_rows(rows: &[Map<String, Value>]) -> Self {
        let Some(first) = rows.first() else {
            return Self {
                columns: vec!["No Data".into()],
                rows: vec![vec!["No completions yet".into()]],
            };
        };
        let keys: Vec<&String> = first.keys().collect();
        Self {
            columns: keys
                .iter()
                .map(|k| k.replace('_', " ").to_uppercase())
                .collect(),
            rows: rows
                .iter()
                .map(|row| keys.iter().map(|k| cell_text(row.get(*k))).collect())
                .collect(),
        }
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render-ready data, rebuilt in full from a snapshot every time
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub comparison: ComparisonSummary,
    pub avg_times: Vec<(Variant, f64)>,
    pub funnel: BTreeMap<Variant, Vec<(String, u64)>>,
    pub table: CompletionTable,
    pub density: BTreeMap<Variant, Vec<(f64, f64)>>,
}

impl DashboardView {
    pub fn build(snapshot: &DashboardSnapshot) -> Self {
        let mut funnel: BTreeMap<Variant, Vec<&FunnelStage>> = BTreeMap::new();
        for stage in &snapshot.funnel {
            funnel.entry(stage.variant).or_default().push(stage);
        }
        let funnel = funnel
            .into_iter()
            .map(|(variant, mut stages)| {
                stages.sort_by_key(|s| s.stage_order);
                (
                    variant,
                    stages
                        .into_iter()
                        .map(|s| (s.stage.clone(), s.event_count))
                        .collect(),
                )
            })
            .collect();

        let mut density = BTreeMap::new();
        density.insert(
            Variant::A,
            gaussian_kde(&snapshot.distribution.variant_a_times, DEFAULT_RESOLUTION),
        );
        density.insert(
            Variant::B,
            gaussian_kde(&snapshot.distribution.variant_b_times, DEFAULT_RESOLUTION),
        );

        Self {
            comparison: ComparisonSummary::from(&snapshot.comparison),
            avg_times: snapshot
                .stats
                .iter()
                .map(|s| (s.variant, s.avg_completion_time))
                .collect(),
            funnel,
            table: CompletionTable::from_rows(&snapshot.recent_completions),
            density,
        }
    }
}

/// Dashboard state: the last good render plus the current error, if any
#[derive(Debug, Default)]
pub struct Dashboard {
    view: Option<DashboardView>,
    last_updated: Option<DateTime<Local>>,
    error: Option<String>,
    refreshing: bool,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one poll cycle. A failed cycle keeps the previous charts.
    pub fn apply(&mut self, result: std::result::Result<DashboardSnapshot, String>, now: DateTime<Local>) {
        self.refreshing = false;
        match result {
            Ok(snapshot) => {
                self.view = Some(DashboardView::build(&snapshot));
                self.last_updated = Some(now);
                self.error = None;
            }
            Err(e) => self.error = Some(e),
        }
    }

    pub fn mark_refreshing(&mut self) {
        self.refreshing = true;
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub fn view(&self) -> Option<&DashboardView> {
        self.view.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_updated_label(&self) -> Option<String> {
        self.last_updated
            .map(|t| format!("Last updated: {}", t.format("%H:%M:%S")))
    }
}
