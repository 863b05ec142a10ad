//! The feature contract and the lifecycle wrapper around a loaded feature.
//!
//! A feature moves `loaded → enabled ⇄ disabled`. Its handlers are live in the
//! event bus exactly while it is enabled: `on_enable` registers them through
//! the [`FeatureContext`], and disabling drops every one of them.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    futures::FutureExt,
    roost_common::events::{EventBus, EventHandler, Handler},
    serde::de::DeserializeOwned,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    metadata::FeatureMetadata,
};

// ── Feature trait ───────────────────────────────────────────────────────────

/// A pluggable unit of functionality. All hooks default to no-ops.
#[async_trait]
pub trait Feature: Any + Send + Sync {
    /// Runs once, synchronously, right after construction.
    fn on_load(&self, _ctx: &FeatureContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Register handlers and start work. The feature is live once this returns.
    async fn on_enable(&self, _ctx: &FeatureContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stop work. Handlers are already unregistered when this runs.
    async fn on_disable(&self, _ctx: &FeatureContext) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── FeatureContext ──────────────────────────────────────────────────────────

/// What a feature sees of its host: its name, its config slice and the bus.
///
/// Registrations made through the context are tracked so they can be dropped
/// in bulk when the feature is disabled.
pub struct FeatureContext {
    name: String,
    config: Value,
    bus: Arc<EventBus>,
    handlers: Mutex<Vec<Arc<EventHandler>>>,
}

impl FeatureContext {
    pub fn new(name: impl Into<String>, config: Value, bus: Arc<EventBus>) -> Self {
        Self {
            name: name.into(),
            config,
            bus,
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_value(&self) -> &Value {
        &self.config
    }

    /// Deserialize the feature's config slice.
    pub fn config<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.config.clone()).map_err(|e| Error::InvalidConfig {
            feature: self.name.clone(),
            reason: e.to_string(),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Register a handler owned by this feature.
    pub fn register_handler<H>(
        &self,
        event: &str,
        handler: H,
        priority: i32,
        ignore_canceled: bool,
    ) -> Result<Arc<EventHandler>>
    where
        H: Handler + 'static,
    {
        let entry = self
            .bus
            .register(&self.name, event, Arc::new(handler), priority, ignore_canceled)?;
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&entry));
        Ok(entry)
    }

    /// Register at priority 0, honouring cancellation.
    pub fn on<H>(&self, event: &str, handler: H) -> Result<Arc<EventHandler>>
    where
        H: Handler + 'static,
    {
        self.register_handler(event, handler, 0, false)
    }

    /// Drop one tracked registration.
    pub fn unregister(&self, handler: &EventHandler) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|h| h.id() != handler.id());
        self.bus.unregister(handler)
    }

    /// Drop every registration this feature made. Returns how many were live.
    pub fn unregister_all(&self) -> usize {
        let handlers = std::mem::take(&mut *self.handlers.lock().unwrap_or_else(|e| e.into_inner()));
        handlers
            .iter()
            .filter(|handler| self.bus.unregister(handler))
            .count()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ── FeatureEntry ────────────────────────────────────────────────────────────

/// A loaded feature: metadata, implementation, context and enabled state.
pub struct FeatureEntry {
    metadata: FeatureMetadata,
    body: String,
    source_path: PathBuf,
    instance: Box<dyn Feature>,
    context: FeatureContext,
    enabled: AtomicBool,
    /// Serializes enable/disable so hooks never run concurrently for one feature.
    transition: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for FeatureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureEntry")
            .field("metadata", &self.metadata)
            .field("source_path", &self.source_path)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl FeatureEntry {
    /// Wrap a constructed instance and run its `on_load` hook.
    ///
    /// Anything registered through the context before this returns, by the
    /// factory or by `on_load`, is unregistered again.
    pub fn load(
        metadata: FeatureMetadata,
        body: String,
        source_path: PathBuf,
        instance: Box<dyn Feature>,
        context: FeatureContext,
    ) -> Result<Self> {
        let loaded = std::panic::catch_unwind(AssertUnwindSafe(|| instance.on_load(&context)))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("on_load panicked")));

        // Handlers are only live between enable and disable.
        let dropped = context.unregister_all();
        if dropped > 0 {
            warn!(
                feature = %metadata.name,
                dropped,
                "dropped handlers registered before enable"
            );
        }
        loaded.map_err(|e| Error::hook(&metadata.name, "load", &e))?;

        Ok(Self {
            metadata,
            body,
            source_path,
            instance,
            context,
            enabled: AtomicBool::new(false),
            transition: tokio::sync::Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &FeatureMetadata {
        &self.metadata
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn context(&self) -> &FeatureContext {
        &self.context
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Downcast the implementation, e.g. to read state a bundled feature exposes.
    pub fn instance<T: Feature>(&self) -> Option<&T> {
        let any: &dyn Any = self.instance.as_ref();
        any.downcast_ref::<T>()
    }

    /// Run `on_enable` and mark the feature live.
    ///
    /// Returns `Ok(false)` without calling the hook when the feature is
    /// already enabled or its metadata sets `disable`. If the hook fails, any
    /// handlers it managed to register are dropped and the feature stays
    /// disabled.
    pub async fn enable(&self) -> Result<bool> {
        let _guard = self.transition.lock().await;

        if self.metadata.disable {
            debug!(feature = %self.name(), "feature is marked disabled, not enabling");
            return Ok(false);
        }
        if self.is_enabled() {
            return Ok(false);
        }

        if let Err(e) = guarded(self.instance.on_enable(&self.context)).await {
            let dropped = self.context.unregister_all();
            debug!(feature = %self.name(), dropped, "dropped handlers of failed enable");
            return Err(Error::hook(self.name(), "enable", &e));
        }

        self.enabled.store(true, Ordering::Release);
        info!(
            feature = %self.name(),
            handlers = self.context.handler_count(),
            "feature enabled"
        );
        Ok(true)
    }

    /// Drop all handlers, run `on_disable` and mark the feature disabled.
    ///
    /// Returns `Ok(false)` without doing anything when the feature is not
    /// enabled or is `threaded`. A failing hook still leaves the feature
    /// disabled; its error is returned afterwards.
    pub async fn disable(&self) -> Result<bool> {
        let _guard = self.transition.lock().await;

        if !self.is_enabled() {
            return Ok(false);
        }
        if self.metadata.threaded {
            debug!(feature = %self.name(), "feature is threaded, not disabling");
            return Ok(false);
        }

        let dropped = self.context.unregister_all();
        let result = guarded(self.instance.on_disable(&self.context)).await;
        self.enabled.store(false, Ordering::Release);
        info!(feature = %self.name(), handlers = dropped, "feature disabled");

        result
            .map(|()| true)
            .map_err(|e| Error::hook(self.name(), "disable", &e))
    }
}

/// Await a lifecycle hook, turning a panic into an error.
async fn guarded<F>(hook: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    AssertUnwindSafe(hook)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(anyhow::anyhow!("lifecycle hook panicked")))
}
