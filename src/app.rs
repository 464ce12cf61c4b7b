use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::attempt_log::{AttemptLog, AttemptRecord};
use crate::dashboard::{Dashboard, DashboardPoller, StatsApi};
use crate::identity::ExperimentContext;
use crate::leaderboard::{self, Completion, SharedReconciler, Standing};
use crate::puzzle::{Phase, Puzzle, PuzzleEvent, SubmitOutcome, TickOutcome};
use crate::runtime::AppEvent;
use crate::tracker::Tracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Puzzle,
    Dashboard,
}

/// What the leaderboard area shows
#[derive(Debug, Clone, PartialEq)]
pub enum LeaderboardPanel {
    Loading,
    Ready(Standing),
    Unavailable(String),
}

/// Long-lived collaborators the app hands work to
pub struct Services {
    pub reconciler: SharedReconciler,
    pub stats_api: Arc<dyn StatsApi>,
    pub dashboard_refresh: Duration,
    pub attempt_log: Option<AttemptLog>,
}

/// A puzzle bound to the visitor it was assigned to
pub struct Session {
    pub puzzle: Puzzle,
    pub tracker: Tracker,
}

impl Session {
    pub fn context(&self) -> &ExperimentContext {
        self.tracker.context()
    }
}

pub struct App {
    pub state: AppState,
    /// None when identity resolution failed
    pub session: Option<Session>,
    pub config_error: Option<String>,
    pub input: String,
    pub leaderboard: LeaderboardPanel,
    pub dashboard: Dashboard,
    pub should_quit: bool,
    leaderboard_request: u64,
    dashboard_poll: u64,
    services: Services,
    poller: Option<DashboardPoller>,
    events: Sender<AppEvent>,
}

impl App {
    pub fn new(session: Session, services: Services, events: Sender<AppEvent>) -> Self {
        let mut app = Self::build(Some(session), None, services, events);
        app.refresh_leaderboard();
        app
    }

    /// Banner-only app: no puzzle interaction, dashboard still reachable
    pub fn misconfigured(message: String, services: Services, events: Sender<AppEvent>) -> Self {
        Self::build(None, Some(message), services, events)
    }

    fn build(
        session: Option<Session>,
        config_error: Option<String>,
        services: Services,
        events: Sender<AppEvent>,
    ) -> Self {
        Self {
            state: AppState::Puzzle,
            session,
            config_error,
            input: String::new(),
            leaderboard: LeaderboardPanel::Loading,
            dashboard: Dashboard::new(),
            should_quit: false,
            leaderboard_request: 0,
            dashboard_poll: 0,
            services,
            poller: None,
            events,
        }
    }

    pub fn puzzle(&self) -> Option<&Puzzle> {
        self.session.as_ref().map(|s| &s.puzzle)
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        self.handle_event_at(event, Instant::now());
    }

    pub fn handle_event_at(&mut self, event: AppEvent, now: Instant) {
        match event {
            AppEvent::Key(key) => self.on_key(key, now),
            AppEvent::Tick => self.on_tick(now),
            AppEvent::Resize => {}
            AppEvent::Leaderboard { request, result } => {
                // a reset or newer completion supersedes older requests
                if request != self.leaderboard_request {
                    return;
                }
                self.leaderboard = match result {
                    Ok(standing) => LeaderboardPanel::Ready(standing),
                    Err(e) => LeaderboardPanel::Unavailable(e),
                };
            }
            AppEvent::Dashboard { poll, result } => {
                // results of a dropped poller may still be queued
                if self.poller.is_none() || poll != self.dashboard_poll {
                    return;
                }
                self.dashboard.apply(result, Local::now());
                self.refresh_standing_with_dashboard();
            }
        }
    }

    fn on_key(&mut self, key: KeyEvent, now: Instant) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        if key.code == KeyCode::Tab {
            self.toggle_dashboard();
            return;
        }

        let phase = self.puzzle().map(Puzzle::phase);
        match (self.state, phase) {
            (AppState::Dashboard, _) => match key.code {
                KeyCode::Esc => self.toggle_dashboard(),
                KeyCode::Char('q') => self.should_quit = true,
                _ => {}
            },
            (AppState::Puzzle, None) => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('q')) {
                    self.should_quit = true;
                }
            }
            (AppState::Puzzle, Some(Phase::Idle)) => match key.code {
                KeyCode::Enter | KeyCode::Char('s') => self.start(now),
                KeyCode::Esc | KeyCode::Char('q') => self.should_quit = true,
                _ => {}
            },
            (AppState::Puzzle, Some(Phase::Running)) => match key.code {
                KeyCode::Enter => self.submit(now),
                KeyCode::Backspace => {
                    self.input.pop();
                }
                KeyCode::Esc => self.reset(false),
                KeyCode::Char(c) if c.is_alphabetic() => self.input.push(c),
                _ => {}
            },
            (AppState::Puzzle, Some(Phase::Completed | Phase::Failed)) => match key.code {
                KeyCode::Enter | KeyCode::Char('t') => self.reset(true),
                KeyCode::Esc | KeyCode::Char('q') => self.should_quit = true,
                _ => {}
            },
        }
    }

    fn start(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.puzzle.start_at(now) {
            self.input.clear();
            self.flush_events();
        }
    }

    fn submit(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let word = std::mem::take(&mut self.input);
        let outcome = session.puzzle.submit_word_at(&word, now);
        match outcome {
            SubmitOutcome::Completed(time) => info!(?time, "puzzle completed"),
            SubmitOutcome::Expired => info!("puzzle failed on a late submission"),
            _ => {}
        }
        self.flush_events();
    }

    fn on_tick(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.puzzle.on_tick_at(now) == TickOutcome::Failed {
            info!("puzzle failed on timeout");
        }
        self.flush_events();
    }

    fn reset(&mut self, is_repeat: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.puzzle.reset(is_repeat);
        self.input.clear();
        self.flush_events();
        self.refresh_leaderboard();
    }

    /// Forward queued lifecycle events and react to terminal transitions
    fn flush_events(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let events = session.puzzle.drain_events();
        for event in &events {
            session.tracker.track_puzzle_event(event);
        }
        for event in events {
            match event {
                PuzzleEvent::Completed { time, .. } => {
                    self.log_attempt();
                    self.reconcile(time);
                }
                PuzzleEvent::Failed { .. } => self.log_attempt(),
                PuzzleEvent::Started { .. } | PuzzleEvent::Repeated => {}
            }
        }
    }

    fn log_attempt(&self) {
        let (Some(log), Some(puzzle)) = (&self.services.attempt_log, self.puzzle()) else {
            return;
        };
        if let Some(record) = AttemptRecord::from_puzzle(puzzle) {
            if let Err(e) = log.append(&record) {
                warn!(error = %e, "could not append attempt log");
            }
        }
    }

    fn reconcile(&mut self, time: Duration) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let identity = &session.context().identity;
        let completion = Completion {
            username: identity.username.clone(),
            variant: identity.variant,
            time,
        };
        self.leaderboard = LeaderboardPanel::Loading;
        let request = self.next_leaderboard_request();
        let tx = self.events.clone();
        leaderboard::reconcile_in_background(
            Arc::clone(&self.services.reconciler),
            completion,
            move |result| {
                let _ = tx.send(AppEvent::Leaderboard { request, result });
            },
        );
    }

    fn next_leaderboard_request(&mut self) -> u64 {
        self.leaderboard_request += 1;
        self.leaderboard_request
    }

    fn refresh_leaderboard(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let identity = &session.context().identity;
        let (username, variant) = (identity.username.clone(), identity.variant);
        let request = self.next_leaderboard_request();
        let tx = self.events.clone();
        leaderboard::refresh_in_background(
            Arc::clone(&self.services.reconciler),
            username,
            variant,
            move |result| {
                let _ = tx.send(AppEvent::Leaderboard { request, result });
            },
        );
    }

    /// Keep the ranking current alongside the dashboard. A completed attempt
    /// keeps the standing its reconciliation produced.
    fn refresh_standing_with_dashboard(&mut self) {
        let reconciled = self
            .puzzle()
            .is_some_and(|p| p.phase() == Phase::Completed);
        if !reconciled {
            self.refresh_leaderboard();
        }
    }

    /// Polling runs only while the dashboard is on screen
    fn toggle_dashboard(&mut self) {
        match self.state {
            AppState::Puzzle => {
                self.dashboard_poll += 1;
                let poll = self.dashboard_poll;
                let tx = self.events.clone();
                self.dashboard.mark_refreshing();
                self.poller = Some(DashboardPoller::spawn(
                    Arc::clone(&self.services.stats_api),
                    self.services.dashboard_refresh,
                    move |result| {
                        let _ = tx.send(AppEvent::Dashboard { poll, result });
                    },
                ));
                self.state = AppState::Dashboard;
            }
            AppState::Dashboard => {
                self.poller.take();
                self.state = AppState::Puzzle;
            }
        }
    }

    /// Stop background work and let queued analytics drain
    pub fn shutdown(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(session) = self.session.take() {
            session.tracker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::{Comparison, FunnelStage, TimeDistribution, VariantStats};
    use crate::error::{Error, Result};
    use crate::identity::{Identity, FEATURE_FLAG_KEY};
    use crate::leaderboard::{LocalLeaderboard, Reconciler};
    use crate::puzzle_config::{PuzzleCatalog, Variant};
    use crate::storage::MemoryStore;
    use crate::tracker::RecordingSink;
    use assert_matches::assert_matches;
    use serde_json::{Map, Value};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Mutex;

    struct OfflineApi;

    impl StatsApi for OfflineApi {
        fn variant_stats(&self) -> Result<Vec<VariantStats>> {
            Err(Error::Configuration("offline".into()))
        }
        fn comparison(&self) -> Result<Comparison> {
            Err(Error::Configuration("offline".into()))
        }
        fn funnel(&self) -> Result<Vec<FunnelStage>> {
            Err(Error::Configuration("offline".into()))
        }
        fn recent_completions(&self, _limit: usize) -> Result<Vec<Map<String, Value>>> {
            Err(Error::Configuration("offline".into()))
        }
        fn time_distribution(&self) -> Result<TimeDistribution> {
            Err(Error::Configuration("offline".into()))
        }
    }

    fn services() -> Services {
        Services {
            reconciler: Arc::new(Mutex::new(
                Box::new(LocalLeaderboard::new(MemoryStore::new())) as Box<dyn Reconciler>
            )),
            stats_api: Arc::new(OfflineApi),
            dashboard_refresh: Duration::from_secs(60),
            attempt_log: None,
        }
    }

    fn app() -> (App, RecordingSink, Receiver<AppEvent>) {
        let (tx, rx) = mpsc::channel();
        let sink = RecordingSink::new();
        let context = ExperimentContext {
            identity: Identity {
                user_id: "user_test".into(),
                username: "Swift Fox".into(),
                variant: Variant::A,
            },
            flag_key: FEATURE_FLAG_KEY.into(),
            flag_response: Some("control".into()),
        };
        let session = Session {
            puzzle: Puzzle::new(Variant::A, PuzzleCatalog::builtin().get(Variant::A).clone()),
            tracker: Tracker::spawn(sink.clone(), context),
        };
        (App::new(session, services(), tx), sink, rx)
    }

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_word(app: &mut App, word: &str, now: Instant) {
        for c in word.chars() {
            app.handle_event_at(key(KeyCode::Char(c)), now);
        }
        app.handle_event_at(key(KeyCode::Enter), now);
    }

    #[test]
    fn keyboard_drives_a_full_attempt() {
        let (mut app, _sink, rx) = app();
        // startup refresh of the (empty) leaderboard
        let startup = rx.recv().unwrap();
        assert_matches!(&startup, AppEvent::Leaderboard { result: Ok(s), .. } if s.is_empty());
        app.handle_event(startup);

        let t0 = Instant::now();
        app.handle_event_at(key(KeyCode::Enter), t0);
        assert_eq!(app.puzzle().unwrap().phase(), Phase::Running);

        type_word(&mut app, "math", t0 + Duration::from_secs(1));
        type_word(&mut app, "zzzz", t0 + Duration::from_secs(2));
        assert_eq!(app.input, "");
        type_word(&mut app, "them", t0 + Duration::from_secs(3));
        type_word(&mut app, "mace", t0 + Duration::from_secs(4));

        let puzzle = app.puzzle().unwrap();
        assert_eq!(puzzle.phase(), Phase::Completed);
        assert_eq!(puzzle.guess_count(), 4);
        assert_eq!(app.leaderboard, LeaderboardPanel::Loading);

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        app.handle_event_at(result, t0 + Duration::from_secs(5));
        let LeaderboardPanel::Ready(standing) = &app.leaderboard else {
            panic!("expected a ranking, got {:?}", app.leaderboard);
        };
        assert_eq!(standing.personal_best, Some(true));
        assert!(standing.rows[0].is_current_user);
    }

    #[test]
    fn timeout_then_try_again_emits_lifecycle_events() {
        let (mut app, sink, _rx) = app();
        let t0 = Instant::now();
        app.handle_event_at(key(KeyCode::Char('s')), t0);
        app.handle_event_at(AppEvent::Tick, t0 + Duration::from_secs(60));
        assert_eq!(app.puzzle().unwrap().phase(), Phase::Failed);

        // typing is ignored once failed
        app.handle_event_at(key(KeyCode::Char('m')), t0 + Duration::from_secs(61));
        assert_eq!(app.input, "");

        app.handle_event_at(key(KeyCode::Char('t')), t0 + Duration::from_secs(62));
        assert_eq!(app.puzzle().unwrap().phase(), Phase::Idle);

        let session = app.session.take().unwrap();
        session.tracker.shutdown();
        let names: Vec<String> = sink.events().into_iter().map(|e| e.event).collect();
        assert_eq!(names, ["puzzle_started", "puzzle_failed", "puzzle_repeated"]);
    }

    #[test]
    fn escape_while_running_resets_without_repeat() {
        let (mut app, sink, _rx) = app();
        let t0 = Instant::now();
        app.handle_event_at(key(KeyCode::Enter), t0);
        app.handle_event_at(key(KeyCode::Char('m')), t0);
        app.handle_event_at(key(KeyCode::Esc), t0);
        assert_eq!(app.puzzle().unwrap().phase(), Phase::Idle);
        assert!(!app.should_quit);
        assert_eq!(app.input, "");

        let session = app.session.take().unwrap();
        session.tracker.shutdown();
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn misconfigured_app_only_quits_or_views_dashboard() {
        let (tx, _rx) = mpsc::channel();
        let mut app = App::misconfigured("flag missing".into(), services(), tx);
        app.handle_event(key(KeyCode::Enter));
        assert!(app.puzzle().is_none());
        assert_eq!(app.config_error.as_deref(), Some("flag missing"));

        app.handle_event(key(KeyCode::Tab));
        assert_eq!(app.state, AppState::Dashboard);
        assert!(app.is_polling());

        app.handle_event(key(KeyCode::Esc));
        assert_eq!(app.state, AppState::Puzzle);
        assert!(!app.is_polling());

        app.handle_event(key(KeyCode::Char('q')));
        assert!(app.should_quit);
    }

    #[test]
    fn dashboard_failure_surfaces_as_error_panel() {
        let (mut app, _sink, rx) = app();
        app.handle_event(key(KeyCode::Tab));
        let update = rx
            .iter()
            .find(|e| matches!(e, AppEvent::Dashboard { .. }))
            .unwrap();
        app.handle_event(update);
        assert!(app.dashboard.error().is_some());
        assert!(app.dashboard.view().is_none());
        app.shutdown();
    }

    #[test]
    fn superseded_leaderboard_results_are_dropped() {
        let (mut app, _sink, rx) = app();
        let startup = rx.recv().unwrap();
        app.handle_event(key(KeyCode::Enter));
        app.handle_event(key(KeyCode::Esc));

        // the reset issued a newer request, so the startup reply is stale
        app.handle_event(startup);
        assert_eq!(app.leaderboard, LeaderboardPanel::Loading);

        let fresh = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        app.handle_event(fresh);
        assert_matches!(&app.leaderboard, LeaderboardPanel::Ready(s) if s.is_empty());
        app.shutdown();
    }

    #[test]
    fn snapshots_from_a_dropped_poller_are_ignored() {
        let (mut app, _sink, _rx) = app();
        app.handle_event(key(KeyCode::Tab));
        app.handle_event(key(KeyCode::Tab));
        app.handle_event(key(KeyCode::Tab));
        assert!(app.is_polling());

        app.handle_event(AppEvent::Dashboard {
            poll: 1,
            result: Err("stale".into()),
        });
        assert_eq!(app.dashboard.error(), None);

        app.handle_event(AppEvent::Dashboard {
            poll: 2,
            result: Err("fresh".into()),
        });
        assert_eq!(app.dashboard.error(), Some("fresh"));
        app.shutdown();
    }

    #[test]
    fn dashboard_cycle_refreshes_the_leaderboard() {
        let (mut app, _sink, rx) = app();
        let startup = rx.recv().unwrap();
        app.handle_event(startup);

        app.handle_event(key(KeyCode::Tab));
        app.handle_event(AppEvent::Dashboard {
            poll: 1,
            result: Err("offline".into()),
        });
        let refreshed = rx
            .iter()
            .find(|e| matches!(e, AppEvent::Leaderboard { .. }))
            .unwrap();
        assert_matches!(&refreshed, AppEvent::Leaderboard { request: 2, result: Ok(_) });
        app.handle_event(refreshed);
        assert_matches!(&app.leaderboard, LeaderboardPanel::Ready(_));
        app.shutdown();
    }

    #[test]
    fn late_submission_fails_instead_of_completing() {
        let (mut app, sink, _rx) = app();
        let t0 = Instant::now();
        app.handle_event_at(key(KeyCode::Enter), t0);
        type_word(&mut app, "math", t0 + Duration::from_secs(1));
        type_word(&mut app, "them", t0 + Duration::from_secs(2));
        // no tick reached the app after the cap passed
        type_word(&mut app, "mace", t0 + Duration::from_secs(75));

        let puzzle = app.puzzle().unwrap();
        assert_eq!(puzzle.phase(), Phase::Failed);
        assert_eq!(puzzle.completion_time(), Some(Duration::from_secs(60)));

        let session = app.session.take().unwrap();
        session.tracker.shutdown();
        let names: Vec<String> = sink.events().into_iter().map(|e| e.event).collect();
        assert_eq!(names, ["puzzle_started", "puzzle_failed"]);
    }

    #[test]
    fn ctrl_c_quits_from_anywhere() {
        let (mut app, _sink, _rx) = app();
        app.handle_event(key(KeyCode::Enter));
        app.handle_event(AppEvent::Key(KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL,
        )));
        assert!(app.should_quit);
    }
}
