//! Priority-ordered, cancellable event bus.
//!
//! The bus owns a closed routing table: event name → priority tier → handlers
//! in registration order. Only events declared with [`EventBus::define_event`]
//! accept registrations; dispatching anything else is inert.
//!
//! Dispatch is strictly sequential. Tiers run highest priority first, and a
//! handler returning [`Flow::Cancel`] vetoes the rest of the chain except for
//! handlers registered with `ignore_canceled`. Handler errors, panics and
//! timeouts are isolated and collected into the [`DispatchReport`].

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    futures::FutureExt,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, info, trace, warn},
    uuid::Uuid,
};

use crate::error::{Error, Result};

/// Canonical form of an event name: trimmed and lowercased.
pub fn normalize_event_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// ── Event ───────────────────────────────────────────────────────────────────

/// A named occurrence delivered by the host, with an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// An event without payload.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    /// String field of an object payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

// ── Flow ────────────────────────────────────────────────────────────────────

/// What a handler wants to happen to the rest of the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    #[default]
    Continue,
    /// Veto the event. Later handlers only run if they ignore cancellation.
    Cancel,
}

// ── Handler trait ───────────────────────────────────────────────────────────

/// An event handler body. Implemented for any `Fn(Event) -> impl Future`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, event: &Event) -> anyhow::Result<Flow>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Flow>> + Send + 'static,
{
    async fn call(&self, event: &Event) -> anyhow::Result<Flow> {
        (self)(event.clone()).await
    }
}

// ── HandlerStats ────────────────────────────────────────────────────────────

/// Per-handler call statistics.
#[derive(Debug, Default)]
pub struct HandlerStats {
    pub call_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub cancel_count: AtomicU64,
    pub total_latency_us: AtomicU64,
}

impl HandlerStats {
    pub fn record(&self, latency: Duration, outcome: &anyhow::Result<Flow>) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        match outcome {
            Ok(Flow::Continue) => {},
            Ok(Flow::Cancel) => {
                self.cancel_count.fetch_add(1, Ordering::Relaxed);
            },
            Err(_) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
            },
        }
    }

    pub fn avg_latency(&self) -> Duration {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return Duration::ZERO;
        }
        let total = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total / calls)
    }
}

// ── EventHandler ────────────────────────────────────────────────────────────

/// An immutable registration binding one feature to one event.
pub struct EventHandler {
    id: Uuid,
    feature: String,
    event: String,
    priority: i32,
    ignore_canceled: bool,
    handler: Arc<dyn Handler>,
    stats: HandlerStats,
}

impl EventHandler {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn ignore_canceled(&self) -> bool {
        self.ignore_canceled
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("id", &self.id)
            .field("feature", &self.feature)
            .field("event", &self.event)
            .field("priority", &self.priority)
            .field("ignore_canceled", &self.ignore_canceled)
            .finish_non_exhaustive()
    }
}

// ── DispatchReport ──────────────────────────────────────────────────────────

/// A handler that returned an error, panicked or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFault {
    pub feature: String,
    pub event: String,
    pub error: String,
}

/// Outcome of one dispatch call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub event: String,
    pub canceled: bool,
    /// Feature whose handler first canceled the chain.
    pub canceled_by: Option<String>,
    /// Owning features of the handlers that ran, in order.
    pub invoked: Vec<String>,
    /// Owning features of the handlers suppressed by cancellation, in order.
    pub skipped: Vec<String>,
    pub faults: Vec<HandlerFault>,
}

impl DispatchReport {
    fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            ..Self::default()
        }
    }

    /// True when no handler vetoed the event.
    pub fn completed(&self) -> bool {
        !self.canceled
    }
}

// ── EventBus ────────────────────────────────────────────────────────────────

type PriorityTiers = BTreeMap<i32, Vec<Arc<EventHandler>>>;

/// The dispatch table plus the single inbound entry point.
#[derive(Default)]
pub struct EventBus {
    table: RwLock<HashMap<String, PriorityTiers>>,
    handler_timeout: Option<Duration>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the run time of every handler invocation. Overruns count as faults.
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout
    }

    /// Declare an event name. Returns false if it was already declared.
    pub fn define_event(&self, name: &str) -> bool {
        let name = normalize_event_name(name);
        if name.is_empty() {
            return false;
        }
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        if table.contains_key(&name) {
            return false;
        }
        debug!(event = %name, "event defined");
        table.insert(name, PriorityTiers::new());
        true
    }

    pub fn define_events<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.define_event(name.as_ref());
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&normalize_event_name(name))
    }

    /// Declared event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Append a handler to `table[event][priority]`.
    pub fn register(
        &self,
        feature: &str,
        event: &str,
        handler: Arc<dyn Handler>,
        priority: i32,
        ignore_canceled: bool,
    ) -> Result<Arc<EventHandler>> {
        let event = normalize_event_name(event);
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let tiers = table
            .get_mut(&event)
            .ok_or_else(|| Error::unknown_event(event.as_str()))?;

        let entry = Arc::new(EventHandler {
            id: Uuid::new_v4(),
            feature: feature.to_string(),
            event: event.clone(),
            priority,
            ignore_canceled,
            handler,
            stats: HandlerStats::default(),
        });
        tiers.entry(priority).or_default().push(Arc::clone(&entry));
        debug!(feature, event = %event, priority, ignore_canceled, "event handler registered");
        Ok(entry)
    }

    /// Remove exactly this registration. Returns false if it was not present.
    pub fn unregister(&self, handler: &EventHandler) -> bool {
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let Some(tiers) = table.get_mut(handler.event()) else {
            return false;
        };
        let Some(tier) = tiers.get_mut(&handler.priority()) else {
            debug!(feature = handler.feature(), event = handler.event(), "handler already unregistered");
            return false;
        };
        let before = tier.len();
        tier.retain(|h| h.id() != handler.id());
        let removed = tier.len() != before;
        if tier.is_empty() {
            tiers.remove(&handler.priority());
        }
        if removed {
            debug!(feature = handler.feature(), event = handler.event(), "event handler unregistered");
        } else {
            debug!(feature = handler.feature(), event = handler.event(), "handler already unregistered");
        }
        removed
    }

    /// Number of live handlers for an event.
    pub fn handler_count(&self, event: &str) -> usize {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize_event_name(event))
            .map_or(0, |tiers| tiers.values().map(Vec::len).sum())
    }

    /// Handlers for an event in dispatch order: priority descending, then
    /// registration order.
    pub fn chain(&self, event: &str) -> Vec<Arc<EventHandler>> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize_event_name(event))
            .map(|tiers| tiers.values().rev().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Every live handler owned by a feature.
    pub fn handlers_of(&self, feature: &str) -> Vec<Arc<EventHandler>> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .flat_map(|tiers| tiers.values().flatten())
            .filter(|h| h.feature() == feature)
            .cloned()
            .collect()
    }

    /// Route one event through its handler chain.
    ///
    /// The chain is snapshotted up front, so registrations made by handlers
    /// take effect from the next dispatch.
    pub async fn dispatch(&self, mut event: Event) -> DispatchReport {
        let name = normalize_event_name(&event.name);
        event.name.clone_from(&name);
        let mut report = DispatchReport::new(&name);

        let chain = self.chain(&name);
        if chain.is_empty() {
            trace!(event = %name, "no handlers for event");
            return report;
        }

        debug!(event = %name, count = chain.len(), "dispatching event");

        for entry in chain {
            if report.canceled && !entry.ignore_canceled() {
                trace!(feature = entry.feature(), event = %name, "handler skipped, event canceled");
                report.skipped.push(entry.feature().to_string());
                continue;
            }

            let start = Instant::now();
            let outcome = self.invoke(&entry, &event).await;
            entry.stats.record(start.elapsed(), &outcome);
            report.invoked.push(entry.feature().to_string());

            match outcome {
                Ok(Flow::Continue) => {},
                Ok(Flow::Cancel) => {
                    if !report.canceled {
                        info!(feature = entry.feature(), event = %name, "event canceled");
                        report.canceled = true;
                        report.canceled_by = Some(entry.feature().to_string());
                    }
                },
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(feature = entry.feature(), event = %name, error = %error, "event handler failed");
                    report.faults.push(HandlerFault {
                        feature: entry.feature().to_string(),
                        event: name.clone(),
                        error,
                    });
                },
            }
        }

        report
    }

    async fn invoke(&self, entry: &EventHandler, event: &Event) -> anyhow::Result<Flow> {
        let call = AssertUnwindSafe(entry.handler.call(event)).catch_unwind();
        let result = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => return Err(anyhow::anyhow!("timed out after {limit:?}")),
            },
            None => call.await,
        };
        result.unwrap_or_else(|panic| {
            Err(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recorder(log: &Log, tag: &'static str, flow: Flow) -> Arc<dyn Handler> {
        let log = Arc::clone(log);
        Arc::new(move |_event: Event| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(tag);
                Ok::<Flow, anyhow::Error>(flow)
            }
        })
    }

    fn failing(log: &Log, tag: &'static str) -> Arc<dyn Handler> {
        let log = Arc::clone(log);
        Arc::new(move |_event: Event| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(tag);
                Err::<Flow, anyhow::Error>(anyhow::anyhow!("boom"))
            }
        })
    }

    fn bus_with(events: &[&str]) -> EventBus {
        let bus = EventBus::new();
        bus.define_events(events);
        bus
    }

    #[tokio::test]
    async fn priority_tiers_run_descending_in_registration_order() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        bus.register("a", "message", recorder(&log, "first-5", Flow::Continue), 5, false)
            .unwrap();
        bus.register("b", "message", recorder(&log, "one", Flow::Continue), 1, false)
            .unwrap();
        bus.register("c", "message", recorder(&log, "second-5", Flow::Continue), 5, false)
            .unwrap();
        bus.register("d", "message", recorder(&log, "zero", Flow::Continue), 0, false)
            .unwrap();

        let report = bus.dispatch(Event::bare("message")).await;

        assert!(report.completed());
        assert_eq!(*log.lock().unwrap(), vec!["first-5", "second-5", "one", "zero"]);
        assert_eq!(report.invoked, vec!["a", "c", "b", "d"]);
    }

    #[tokio::test]
    async fn cancel_skips_later_handlers_unless_they_ignore_it() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        bus.register("h1", "message", recorder(&log, "h1", Flow::Cancel), 2, false)
            .unwrap();
        bus.register("h2", "message", recorder(&log, "h2", Flow::Continue), 1, false)
            .unwrap();
        bus.register("h3", "message", recorder(&log, "h3", Flow::Continue), 1, true)
            .unwrap();

        let report = bus.dispatch(Event::bare("message")).await;

        assert!(!report.completed());
        assert_eq!(*log.lock().unwrap(), vec!["h1", "h3"]);
        assert_eq!(report.skipped, vec!["h2"]);
        assert_eq!(report.canceled_by.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn cancel_within_a_tier_stops_the_rest_of_that_tier() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        bus.register("a", "message", recorder(&log, "a", Flow::Cancel), 0, false)
            .unwrap();
        bus.register("b", "message", recorder(&log, "b", Flow::Continue), 0, false)
            .unwrap();
        bus.register("c", "message", recorder(&log, "c", Flow::Continue), -1, true)
            .unwrap();

        let report = bus.dispatch(Event::bare("message")).await;

        assert!(report.canceled);
        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn continue_never_cancels() {
        let bus = bus_with(&["ready"]);
        let log: Log = Arc::default();
        for tag in ["x", "y", "z"] {
            bus.register(tag, "ready", recorder(&log, tag, Flow::Continue), 0, false)
                .unwrap();
        }

        let report = bus.dispatch(Event::bare("ready")).await;

        assert!(report.completed());
        assert!(report.skipped.is_empty());
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_chain() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        bus.register("broken", "message", failing(&log, "broken"), 10, false)
            .unwrap();
        bus.register("after", "message", recorder(&log, "after", Flow::Continue), 0, false)
            .unwrap();

        let report = bus.dispatch(Event::bare("message")).await;

        assert!(report.completed());
        assert_eq!(*log.lock().unwrap(), vec!["broken", "after"]);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].feature, "broken");
        assert_eq!(report.faults[0].event, "message");
        assert!(report.faults[0].error.contains("boom"));
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        let panicker: Arc<dyn Handler> = Arc::new(|_event: Event| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<Flow, anyhow::Error>(Flow::Continue)
        });
        bus.register("panicky", "message", panicker, 1, false).unwrap();
        bus.register("after", "message", recorder(&log, "after", Flow::Continue), 0, false)
            .unwrap();

        let report = bus.dispatch(Event::bare("message")).await;

        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(report.faults.len(), 1);
        assert!(report.faults[0].error.contains("handler exploded"));
    }

    #[tokio::test]
    async fn slow_handler_times_out_as_fault() {
        let bus = bus_with(&["message"]).with_handler_timeout(Some(Duration::from_millis(20)));
        let log: Log = Arc::default();
        let slow: Arc<dyn Handler> = Arc::new(|_event: Event| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<Flow, anyhow::Error>(Flow::Cancel)
        });
        bus.register("slow", "message", slow, 1, false).unwrap();
        bus.register("after", "message", recorder(&log, "after", Flow::Continue), 0, false)
            .unwrap();

        let report = bus.dispatch(Event::bare("message")).await;

        assert!(report.completed());
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert!(report.faults[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_event_is_inert() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        bus.register("a", "message", recorder(&log, "a", Flow::Cancel), 0, false)
            .unwrap();

        let report = bus.dispatch(Event::bare("never-declared")).await;

        assert!(report.completed());
        assert!(report.invoked.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn register_requires_declared_event() {
        let bus = EventBus::new();
        let log: Log = Arc::default();
        let err = bus
            .register("a", "message", recorder(&log, "a", Flow::Continue), 0, false)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownEvent { ref event } if event == "message"));
    }

    #[test]
    fn define_event_normalizes_names() {
        let bus = EventBus::new();
        assert!(bus.define_event("  Message "));
        assert!(!bus.define_event("MESSAGE"));
        assert!(!bus.define_event("   "));
        assert!(bus.is_defined("message"));
        assert!(bus.is_defined(" MeSsAgE"));
        assert_eq!(bus.event_names(), vec!["message"]);
    }

    #[tokio::test]
    async fn dispatch_matches_normalized_name() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        bus.register("a", "Message", recorder(&log, "a", Flow::Continue), 0, false)
            .unwrap();

        let report = bus.dispatch(Event::bare(" MESSAGE ")).await;

        assert_eq!(report.event, "message");
        assert_eq!(report.invoked, vec!["a"]);
    }

    #[test]
    fn unregister_removes_exact_registration() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        let first = bus
            .register("a", "message", recorder(&log, "a", Flow::Continue), 3, false)
            .unwrap();
        let second = bus
            .register("a", "message", recorder(&log, "a2", Flow::Continue), 3, false)
            .unwrap();

        assert!(bus.unregister(&first));
        assert_eq!(bus.handler_count("message"), 1);
        assert_eq!(bus.chain("message")[0].id(), second.id());

        assert!(!bus.unregister(&first));
        assert!(bus.unregister(&second));
        assert_eq!(bus.handler_count("message"), 0);
        assert!(bus.is_defined("message"));
    }

    #[test]
    fn handlers_of_filters_by_feature() {
        let bus = bus_with(&["message", "ready"]);
        let log: Log = Arc::default();
        bus.register("a", "message", recorder(&log, "a", Flow::Continue), 0, false)
            .unwrap();
        bus.register("a", "ready", recorder(&log, "a", Flow::Continue), 0, false)
            .unwrap();
        bus.register("b", "ready", recorder(&log, "b", Flow::Continue), 0, false)
            .unwrap();

        assert_eq!(bus.handlers_of("a").len(), 2);
        assert_eq!(bus.handlers_of("b").len(), 1);
        assert!(bus.handlers_of("c").is_empty());
    }

    #[tokio::test]
    async fn stats_track_calls_cancels_and_failures() {
        let bus = bus_with(&["message"]);
        let log: Log = Arc::default();
        let ok = bus
            .register("ok", "message", recorder(&log, "ok", Flow::Cancel), 1, true)
            .unwrap();
        let bad = bus
            .register("bad", "message", failing(&log, "bad"), 0, true)
            .unwrap();

        bus.dispatch(Event::bare("message")).await;
        bus.dispatch(Event::bare("message")).await;

        assert_eq!(ok.stats().call_count.load(Ordering::Relaxed), 2);
        assert_eq!(ok.stats().cancel_count.load(Ordering::Relaxed), 2);
        assert_eq!(bad.stats().failure_count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn avg_latency_reflects_slow_handler() {
        let bus = bus_with(&["message"]);
        let slow: Arc<dyn Handler> = Arc::new(|_event: Event| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<Flow, anyhow::Error>(Flow::Continue)
        });
        let handler = bus.register("slow", "message", slow, 0, false).unwrap();
        assert_eq!(handler.stats().avg_latency(), Duration::ZERO);

        bus.dispatch(Event::bare("message")).await;
        bus.dispatch(Event::bare("message")).await;

        assert!(handler.stats().avg_latency() >= Duration::from_millis(20));
    }

    #[test]
    fn event_payload_accessor() {
        let event = Event::new("message", serde_json::json!({"content": "hi", "n": 1}));
        assert_eq!(event.payload_str("content"), Some("hi"));
        assert_eq!(event.payload_str("n"), None);
        assert_eq!(Event::bare("ready").payload_str("content"), None);
    }
}
