use std::cell::Cell;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyEvent, KeyEventKind};

use crate::dashboard::DashboardSnapshot;
use crate::leaderboard::Standing;

/// Everything the event loop reacts to
#[derive(Clone, Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize,
    Tick,
    /// Ranking for the request with the given id
    Leaderboard {
        request: u64,
        result: Result<Standing, String>,
    },
    /// Snapshot from the poller with the given id
    Dashboard {
        poll: u64,
        result: Result<DashboardSnapshot, String>,
    },
}

/// Source of events for the app loop
pub trait AppEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError>;

    /// Handle for background workers to post results into the same queue
    fn sender(&self) -> Sender<AppEvent>;
}

/// Terminal input plus worker results on one channel
pub struct CrosstermEventSource {
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let input = tx.clone();

        std::thread::spawn(move || loop {
            let forwarded = match event::read() {
                Ok(CtEvent::Key(key)) if key.kind != KeyEventKind::Release => {
                    input.send(AppEvent::Key(key))
                }
                Ok(CtEvent::Resize(_, _)) => input.send(AppEvent::Resize),
                Ok(_) => Ok(()),
                Err(_) => break,
            };
            if forwarded.is_err() {
                break;
            }
        });

        Self { tx, rx }
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AppEventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    fn sender(&self) -> Sender<AppEvent> {
        self.tx.clone()
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Channel-backed source for headless runs
pub struct TestEventSource {
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
}

impl TestEventSource {
    /// Returns the source and a sender for scripting input
    pub fn new() -> (Self, Sender<AppEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: tx.clone(), rx }, tx)
    }
}

impl AppEventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    fn sender(&self) -> Sender<AppEvent> {
        self.tx.clone()
    }
}

/// Runner that advances the application one event/tick at a time
pub struct Runner<E: AppEventSource, T: Ticker> {
    event_source: E,
    ticker: T,
    next_tick: Cell<Instant>,
}

impl<E: AppEventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        let next_tick = Cell::new(Instant::now() + ticker.interval());
        Self {
            event_source,
            ticker,
            next_tick,
        }
    }

    pub fn sender(&self) -> Sender<AppEvent> {
        self.event_source.sender()
    }

    /// Returns the next event, or Tick once the tick deadline has passed.
    /// Ticks are due on schedule even while events keep arriving.
    pub fn step(&self) -> AppEvent {
        let now = Instant::now();
        let deadline = self.next_tick.get();
        if now >= deadline {
            return self.tick(now);
        }
        match self.event_source.recv_timeout(deadline - now) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.tick(Instant::now())
            }
        }
    }

    fn tick(&self, now: Instant) -> AppEvent {
        self.next_tick.set(now + self.ticker.interval());
        AppEvent::Tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn step_returns_tick_on_timeout() {
        let (es, _tx) = TestEventSource::new();
        let runner = Runner::new(es, FixedTicker::new(Duration::from_millis(1)));

        assert_matches!(runner.step(), AppEvent::Tick);
    }

    #[test]
    fn step_passes_through_events() {
        let (es, tx) = TestEventSource::new();
        tx.send(AppEvent::Resize).unwrap();
        let runner = Runner::new(es, FixedTicker::new(Duration::from_secs(1)));

        assert_matches!(runner.step(), AppEvent::Resize);
    }

    #[test]
    fn worker_results_share_the_queue() {
        let (es, _tx) = TestEventSource::new();
        let runner = Runner::new(es, FixedTicker::new(Duration::from_secs(1)));
        let worker = runner.sender();
        std::thread::spawn(move || {
            worker
                .send(AppEvent::Leaderboard {
                    request: 1,
                    result: Err("offline".into()),
                })
                .unwrap();
        })
        .join()
        .unwrap();

        assert_matches!(
            runner.step(),
            AppEvent::Leaderboard { request: 1, result: Err(e) } if e == "offline"
        );
    }

    #[test]
    fn steady_input_does_not_starve_ticks() {
        let (es, tx) = TestEventSource::new();
        let runner = Runner::new(es, FixedTicker::new(Duration::from_millis(50)));
        let typing = std::thread::spawn(move || {
            for _ in 0..60 {
                if tx.send(AppEvent::Resize).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let start = Instant::now();
        let (mut ticks, mut others) = (0, 0);
        while start.elapsed() < Duration::from_millis(300) {
            match runner.step() {
                AppEvent::Tick => ticks += 1,
                _ => others += 1,
            }
        }
        typing.join().unwrap();

        assert!(others > 0);
        assert!(ticks >= 3, "only {ticks} ticks in 300ms");
    }
}
