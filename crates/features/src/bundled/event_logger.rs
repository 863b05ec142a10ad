//! `event-logger` feature: appends every dispatched event to a JSONL file.
//!
//! Runs last on every declared event and ignores cancellation, so vetoed
//! events are recorded too.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    anyhow::Result,
    async_trait::async_trait,
    roost_common::events::{Event, Flow, Handler},
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::feature::{Feature, FeatureContext};

pub const CLASS: &str = "event-logger";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventLoggerConfig {
    /// JSONL output. Without it events are only counted.
    pub path: Option<PathBuf>,
    /// Events to record. Empty means every declared event.
    pub events: Vec<String>,
}

pub struct EventLogger {
    events: Vec<String>,
    sink: Arc<EventSink>,
}

/// Shared between the feature and its registered handlers.
struct EventSink {
    path: Option<PathBuf>,
    /// Serializes appends.
    file: Mutex<Option<std::fs::File>>,
    recorded: AtomicU64,
}

impl EventSink {
    fn ensure_file(&self, path: &Path) -> Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            *guard = Some(file);
        }
        Ok(())
    }

    fn record(&self, event: &Event) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.ensure_file(path) {
            warn!(error = %e, path = %path.display(), "event-logger: failed to open log file");
            return;
        }

        let entry = serde_json::json!({
            "ts": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            "event": event.name,
            "payload": event.payload,
        });

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref mut f) = *guard
            && let Err(e) = writeln!(f, "{entry}")
        {
            warn!(error = %e, "event-logger: failed to write log entry");
        }
    }
}

struct RecordEvent(Arc<EventSink>);

#[async_trait]
impl Handler for RecordEvent {
    async fn call(&self, event: &Event) -> Result<Flow> {
        self.0.record(event);
        Ok(Flow::Continue)
    }
}

impl EventLogger {
    pub fn new(config: EventLoggerConfig) -> Self {
        Self {
            events: config.events,
            sink: Arc::new(EventSink {
                path: config.path,
                file: Mutex::new(None),
                recorded: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_context(ctx: &FeatureContext) -> crate::Result<Self> {
        Ok(Self::new(ctx.config()?))
    }

    /// Events seen since load.
    pub fn recorded(&self) -> u64 {
        self.sink.recorded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Feature for EventLogger {
    async fn on_enable(&self, ctx: &FeatureContext) -> Result<()> {
        let events = if self.events.is_empty() {
            ctx.bus().event_names()
        } else {
            self.events.clone()
        };
        for event in &events {
            ctx.register_handler(event, RecordEvent(Arc::clone(&self.sink)), i32::MIN, true)?;
        }
        debug!(feature = %ctx.name(), count = events.len(), "event-logger attached");
        Ok(())
    }

    async fn on_disable(&self, _ctx: &FeatureContext) -> Result<()> {
        // Reopened on the next enable.
        *self.sink.file.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
