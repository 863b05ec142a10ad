//! Host configuration schema.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Event names routed when the config does not declare its own catalogue.
pub const DEFAULT_EVENTS: &[&str] = &[
    "ready",
    "message",
    "message_edit",
    "message_delete",
    "reaction_add",
    "reaction_remove",
    "member_join",
    "member_remove",
    "command",
    "shutdown",
];

/// Settings for the feature host itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for `<name>/FEATURE.md` manifests.
    pub features_dir: PathBuf,
    /// Closed catalogue of event names the dispatcher routes.
    pub events: Vec<String>,
    /// Upper bound on a single handler invocation. Unset means unbounded.
    pub handler_timeout_secs: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            features_dir: PathBuf::from("features"),
            events: DEFAULT_EVENTS.iter().map(|e| (*e).to_string()).collect(),
            handler_timeout_secs: None,
        }
    }
}

impl HostConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_secs.map(Duration::from_secs)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoostConfig {
    pub host: HostConfig,
    /// Per-feature settings, keyed by feature name.
    pub features: HashMap<String, Value>,
}

impl RoostConfig {
    /// The config slice for one feature. Absent means an empty object.
    pub fn feature_config(&self, name: &str) -> Value {
        self.features
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}
