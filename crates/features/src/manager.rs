//! Feature registry and bulk orchestration.
//!
//! The manager owns every loaded [`FeatureEntry`] in load order, addressable
//! by name, and the [`EventBus`] they register against. It is built
//! explicitly and shared as `Arc<FeatureManager>`.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Instant,
};

use {
    roost_common::events::{DispatchReport, Event, EventBus},
    roost_config::RoostConfig,
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, error, info, warn},
};

use crate::{
    catalog::FeatureCatalog,
    discovery::{Candidate, FeatureSource, FsFeatureSource},
    error::{Error, Result},
    feature::{FeatureContext, FeatureEntry},
    metadata::{FeatureMetadata, ParsedFeature},
};

// ── Reports ─────────────────────────────────────────────────────────────────

/// A manifest that could not be turned into a loaded feature.
#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

/// A lifecycle hook that failed for one feature.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureFailure {
    pub feature: String,
    pub error: String,
}

/// A feature left disabled because some hard dependencies never came up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub feature: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnableReport {
    /// Features that transitioned to enabled during this call, in order.
    pub enabled: Vec<String>,
    pub failed: Vec<FeatureFailure>,
    pub unresolved: Vec<Unresolved>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DisableReport {
    pub disabled: Vec<String>,
    /// Threaded features that stayed enabled.
    pub retained: Vec<String>,
    pub failed: Vec<FeatureFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadReport {
    pub disable: DisableReport,
    pub removed: Vec<String>,
    pub load: LoadReport,
    pub enable: EnableReport,
}

// ── FeatureManager ──────────────────────────────────────────────────────────

pub struct FeatureManager {
    bus: Arc<EventBus>,
    catalog: FeatureCatalog,
    source: Box<dyn FeatureSource>,
    settings: RwLock<HashMap<String, Value>>,
    features: RwLock<Vec<Arc<FeatureEntry>>>,
}

impl FeatureManager {
    pub fn new(
        bus: Arc<EventBus>,
        catalog: FeatureCatalog,
        source: impl FeatureSource + 'static,
    ) -> Self {
        Self {
            bus,
            catalog,
            source: Box::new(source),
            settings: RwLock::new(HashMap::new()),
            features: RwLock::new(Vec::new()),
        }
    }

    /// Per-feature config blobs keyed by feature name.
    #[must_use]
    pub fn with_settings(self, settings: HashMap<String, Value>) -> Self {
        self.set_settings(settings);
        self
    }

    /// Build a manager from host config: declared events, handler timeout,
    /// features directory and per-feature settings.
    pub fn from_config(config: &RoostConfig, catalog: FeatureCatalog) -> Self {
        let bus = EventBus::new().with_handler_timeout(config.host.handler_timeout());
        bus.define_events(&config.host.events);
        Self::new(
            Arc::new(bus),
            catalog,
            FsFeatureSource::new(&config.host.features_dir),
        )
        .with_settings(config.features.clone())
    }

    /// Replace the settings used by subsequent loads.
    pub fn set_settings(&self, settings: HashMap<String, Value>) {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    /// Pick up a re-read config before a reload. Newly listed events are
    /// declared; events are never undeclared.
    pub fn apply_config(&self, config: &RoostConfig) {
        self.bus.define_events(&config.host.events);
        self.set_settings(config.features.clone());
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn define_event(&self, name: &str) -> bool {
        self.bus.define_event(name)
    }

    // ── Loading ─────────────────────────────────────────────────────────

    /// Discover and load every manifest. One bad manifest never stops the rest.
    pub async fn load_all(&self) -> Result<LoadReport> {
        let candidates = self.source.discover().await?;
        let report = self.load_candidates(candidates, |_| true);
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "features loaded"
        );
        Ok(report)
    }

    fn load_candidates(
        &self,
        candidates: Vec<Candidate>,
        wanted: impl Fn(&str) -> bool,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        for Candidate { path, parsed } in candidates {
            let outcome = match parsed {
                Ok(parsed) if !wanted(&parsed.metadata.name) => continue,
                Ok(parsed) => self.load_feature(parsed),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(entry) => report.loaded.push(entry.name().to_string()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load feature");
                    report.failed.push(LoadFailure {
                        path,
                        error: e.to_string(),
                    });
                },
            }
        }
        report
    }

    /// Construct, `on_load` and register one feature.
    pub fn load_feature(&self, parsed: ParsedFeature) -> Result<Arc<FeatureEntry>> {
        let ParsedFeature {
            metadata,
            body,
            source_path,
        } = parsed;
        metadata
            .validate()
            .map_err(|reason| Error::invalid_metadata(&source_path, reason))?;

        let name = metadata.name.clone();
        if self.get_feature(&name).is_some() {
            return Err(Error::DuplicateFeature { name });
        }

        let config = self
            .settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let ctx = FeatureContext::new(&name, config, Arc::clone(&self.bus));
        let instance = match self.catalog.instantiate(&metadata.class, &ctx) {
            Ok(instance) => instance,
            Err(e) => {
                ctx.unregister_all();
                return Err(e);
            },
        };
        let entry = Arc::new(FeatureEntry::load(
            metadata,
            body,
            source_path,
            instance,
            ctx,
        )?);

        let mut features = self.features.write().unwrap_or_else(|e| e.into_inner());
        if features.iter().any(|f| f.name() == name) {
            return Err(Error::DuplicateFeature { name });
        }
        features.push(Arc::clone(&entry));
        drop(features);

        info!(
            feature = %name,
            class = %entry.metadata().class,
            path = %entry.source_path().display(),
            "feature loaded"
        );
        Ok(entry)
    }

    /// Load a feature declared in code rather than on disk.
    pub fn load_inline(&self, metadata: FeatureMetadata) -> Result<Arc<FeatureEntry>> {
        self.load_feature(ParsedFeature::inline(metadata))
    }

    // ── Enabling ────────────────────────────────────────────────────────

    /// Enable every loaded feature whose hard dependencies are enabled,
    /// retrying the rest until a pass makes no progress.
    pub async fn enable_all(&self) -> EnableReport {
        let start = Instant::now();
        let mut report = EnableReport::default();
        let mut skipped: Vec<Arc<FeatureEntry>> = Vec::new();

        for feature in self.features() {
            self.try_enable(&feature, &mut skipped, &mut report).await;
        }

        loop {
            let before = skipped.len();
            for feature in skipped.clone() {
                self.try_enable(&feature, &mut skipped, &mut report).await;
            }
            if skipped.len() == before {
                break;
            }
        }

        for feature in skipped {
            let missing = self.missing_dependencies(feature.metadata());
            warn!(
                feature = %feature.name(),
                missing = %missing.join(", "),
                "feature not enabled, dependencies unavailable"
            );
            report.unresolved.push(Unresolved {
                feature: feature.name().to_string(),
                missing,
            });
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            enabled = report.enabled.len(),
            failed = report.failed.len(),
            unresolved = report.unresolved.len(),
            elapsed_ms = report.elapsed_ms,
            "enable_all finished"
        );
        report
    }

    async fn try_enable(
        &self,
        feature: &Arc<FeatureEntry>,
        skipped: &mut Vec<Arc<FeatureEntry>>,
        report: &mut EnableReport,
    ) {
        let name = feature.name();
        if !self.missing_dependencies(feature.metadata()).is_empty() {
            if !skipped.iter().any(|s| s.name() == name) {
                debug!(feature = %name, "dependencies not ready, deferring");
                skipped.push(Arc::clone(feature));
            }
            return;
        }

        skipped.retain(|s| s.name() != name);
        if feature.is_enabled() {
            return;
        }

        match feature.enable().await {
            Ok(true) => report.enabled.push(name.to_string()),
            Ok(false) => {},
            Err(e) => {
                error!(feature = %name, error = %e, "failed to enable feature");
                report.failed.push(FeatureFailure {
                    feature: name.to_string(),
                    error: e.to_string(),
                });
            },
        }
    }

    /// Declared hard dependencies that are not currently enabled.
    fn missing_dependencies(&self, metadata: &FeatureMetadata) -> Vec<String> {
        metadata
            .depend
            .iter()
            .filter(|dep| !self.is_enabled(dep))
            .cloned()
            .collect()
    }

    pub async fn enable_feature(&self, name: &str) -> Result<bool> {
        let feature = self.get_feature(name).ok_or_else(|| Error::not_found(name))?;
        let missing = self.missing_dependencies(feature.metadata());
        if !missing.is_empty() {
            return Err(Error::MissingDependencies {
                feature: name.to_string(),
                missing,
            });
        }
        feature.enable().await
    }

    // ── Disabling ───────────────────────────────────────────────────────

    /// Disable every enabled feature in load order. Threaded features stay up.
    pub async fn disable_all(&self) -> DisableReport {
        let mut report = DisableReport::default();
        for feature in self.features() {
            if !feature.is_enabled() {
                continue;
            }
            if feature.metadata().threaded {
                info!(feature = %feature.name(), "feature is threaded, leaving it enabled");
                report.retained.push(feature.name().to_string());
                continue;
            }
            match feature.disable().await {
                Ok(_) => report.disabled.push(feature.name().to_string()),
                Err(e) => {
                    error!(feature = %feature.name(), error = %e, "failed to disable feature");
                    report.failed.push(FeatureFailure {
                        feature: feature.name().to_string(),
                        error: e.to_string(),
                    });
                },
            }
        }
        info!(
            disabled = report.disabled.len(),
            retained = report.retained.len(),
            "disable_all finished"
        );
        report
    }

    /// Disable one feature. Enabled dependents are left running.
    pub async fn disable_feature(&self, name: &str) -> Result<bool> {
        let feature = self.get_feature(name).ok_or_else(|| Error::not_found(name))?;
        let dependents = self.dependents_of(name);
        if feature.is_enabled() && !dependents.is_empty() {
            warn!(
                feature = %name,
                dependents = %dependents.join(", "),
                "disabling a feature other enabled features depend on"
            );
        }
        feature.disable().await
    }

    // ── Reloading ───────────────────────────────────────────────────────

    /// Disable everything, drop every feature that is now disabled, load
    /// those names again from fresh manifests and config, then enable.
    ///
    /// Manifests are read first. If discovery fails the registry is left
    /// untouched and nothing is disabled.
    pub async fn reload_all(&self) -> Result<ReloadReport> {
        let candidates = self.source.discover().await?;
        let disable = self.disable_all().await;

        let names: Vec<String> = {
            let mut features = self.features.write().unwrap_or_else(|e| e.into_inner());
            let (kept, removed): (Vec<_>, Vec<_>) =
                features.drain(..).partition(|f| f.is_enabled());
            *features = kept;
            removed.iter().map(|f| f.name().to_string()).collect()
        };
        debug!(count = names.len(), "features removed for reload");

        let load = self.load_candidates(candidates, |name| names.iter().any(|n| n == name));
        let enable = self.enable_all().await;

        info!(
            removed = names.len(),
            loaded = load.loaded.len(),
            enabled = enable.enabled.len(),
            "reload finished"
        );
        Ok(ReloadReport {
            disable,
            removed: names,
            load,
            enable,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get_feature(name).is_some_and(|f| f.is_enabled())
    }

    pub fn get_feature(&self, name: &str) -> Option<Arc<FeatureEntry>> {
        self.features
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|f| f.name() == name)
            .cloned()
    }

    /// Loaded feature names in load order.
    pub fn feature_names(&self) -> Vec<String> {
        self.features
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Snapshot of the registry in load order.
    pub fn features(&self) -> Vec<Arc<FeatureEntry>> {
        self.features
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Enabled features that declare `name` as a hard dependency.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.features
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|f| f.is_enabled() && f.metadata().depend.iter().any(|d| d == name))
            .map(|f| f.name().to_string())
            .collect()
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// The inbound entry point for host events.
    pub async fn dispatch(&self, event: &str, payload: Value) -> DispatchReport {
        self.bus.dispatch(Event::new(event, payload)).await
    }
}
