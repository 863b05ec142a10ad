//! Feature loading, lifecycle and orchestration.
//!
//! A feature is declared by a `FEATURE.md` manifest (TOML frontmatter plus
//! markdown docs) whose `class` names an implementation in the
//! [`FeatureCatalog`]. The [`FeatureManager`] discovers manifests, loads
//! them, enables them in dependency order and routes host events to their
//! handlers through the shared event bus.

pub mod bundled;
pub mod catalog;
pub mod discovery;
pub mod error;
pub mod feature;
pub mod manager;
pub mod metadata;

pub use {
    catalog::{FeatureCatalog, FeatureFactory},
    discovery::{Candidate, FeatureSource, FsFeatureSource, MANIFEST_FILE, StaticFeatureSource},
    error::{Error, Result},
    feature::{Feature, FeatureContext, FeatureEntry},
    manager::{
        DisableReport, EnableReport, FeatureFailure, FeatureManager, LoadFailure, LoadReport,
        ReloadReport, Unresolved,
    },
    metadata::{FeatureMetadata, ParsedFeature, parse_feature_md},
};
