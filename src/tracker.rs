use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::identity::ExperimentContext;
use crate::puzzle::PuzzleEvent;
use crate::util::round_secs;

pub const PUZZLE_STARTED: &str = "puzzle_started";
pub const PUZZLE_COMPLETED: &str = "puzzle_completed";
pub const PUZZLE_FAILED: &str = "puzzle_failed";
pub const PUZZLE_REPEATED: &str = "puzzle_repeated";
pub const IDENTIFY: &str = "$identify";

/// One analytics event with the common experiment context already attached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEvent {
    pub event: String,
    pub distinct_id: String,
    pub timestamp: DateTime<Local>,
    pub properties: Map<String, Value>,
}

/// Analytics destination. Failures are reported, never retried.
pub trait EventSink: Send + 'static {
    fn send(&mut self, event: &TrackedEvent) -> Result<()>;
}

/// Writes events to the log instead of a remote sink
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn send(&mut self, event: &TrackedEvent) -> Result<()> {
        let properties = Value::Object(event.properties.clone());
        info!(event = %event.event, %properties, "tracked");
        Ok(())
    }
}

/// POSTs events to `{host}/capture/`
#[derive(Debug)]
pub struct HttpEventSink {
    client: reqwest::blocking::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpEventSink {
    pub fn new(host: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/capture/", host.trim_end_matches('/')),
            api_key,
        })
    }
}

impl EventSink for HttpEventSink {
    fn send(&mut self, event: &TrackedEvent) -> Result<()> {
        let body = json!({
            "api_key": self.api_key,
            "event": event.event,
            "distinct_id": event.distinct_id,
            "timestamp": event.timestamp.to_rfc3339(),
            "properties": event.properties,
        });
        let response = self.client.post(&self.url).json(&body).send()?;
        if !response.status().is_success() {
            return Err(Error::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Keeps every event in memory; handy for tests and debugging
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<TrackedEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrackedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn send(&mut self, event: &TrackedEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

/// Fire-and-forget tracker: `track` only enqueues, a worker thread delivers.
pub struct Tracker {
    context: ExperimentContext,
    tx: Option<Sender<TrackedEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl Tracker {
    pub fn spawn<S: EventSink>(mut sink: S, context: ExperimentContext) -> Self {
        let (tx, rx) = mpsc::channel::<TrackedEvent>();

        let worker = thread::spawn(move || {
            for event in rx {
                let sent = panic::catch_unwind(AssertUnwindSafe(|| sink.send(&event)));
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(event = %event.event, error = %e, "dropping event"),
                    Err(_) => warn!(event = %event.event, "event sink panicked, dropping event"),
                }
            }
        });

        Self {
            context,
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn context(&self) -> &ExperimentContext {
        &self.context
    }

    /// Attach the common context and hand the event to the worker
    pub fn track(&self, name: &str, extra: Map<String, Value>) {
        let identity = &self.context.identity;
        let mut properties = Map::new();
        properties.insert("variant".into(), json!(identity.variant));
        properties.insert("user_id".into(), json!(identity.user_id));
        properties.insert("username".into(), json!(identity.username));
        properties.insert("$feature_flag".into(), json!(self.context.flag_key));
        properties.insert(
            "$feature_flag_response".into(),
            json!(self.context.flag_response),
        );
        properties.extend(extra);

        let event = TrackedEvent {
            event: name.to_string(),
            distinct_id: identity.username.clone(),
            timestamp: Local::now(),
            properties,
        };

        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                warn!(event = name, "tracker worker gone, dropping event");
            }
        }
    }

    /// Tell the sink who this visitor is
    pub fn identify(&self) {
        let mut props = Map::new();
        props.insert(
            "$set".into(),
            json!({ "username": self.context.identity.username }),
        );
        self.track(IDENTIFY, props);
    }

    pub fn track_puzzle_event(&self, event: &PuzzleEvent) {
        let mut props = Map::new();
        let name = match event {
            PuzzleEvent::Started { difficulty } => {
                props.insert("difficulty".into(), json!(difficulty));
                PUZZLE_STARTED
            }
            PuzzleEvent::Completed {
                time,
                found,
                guesses,
            } => {
                props.insert("completion_time_seconds".into(), json!(round_secs(*time)));
                props.insert("correct_words_count".into(), json!(found));
                props.insert("total_guesses_count".into(), json!(guesses));
                PUZZLE_COMPLETED
            }
            PuzzleEvent::Failed { found, guesses } => {
                props.insert("correct_words_count".into(), json!(found));
                props.insert("total_guesses_count".into(), json!(guesses));
                PUZZLE_FAILED
            }
            PuzzleEvent::Repeated => PUZZLE_REPEATED,
        };
        self.track(name, props);
    }

    /// Close the channel and wait for queued events to be delivered
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.finish();
    }
}
