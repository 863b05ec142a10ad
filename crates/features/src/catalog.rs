//! Named feature implementations.
//!
//! A manifest's `class` is a key into the catalog. Hosts register factories
//! up front; loading a manifest whose class is not registered is a load error
//! for that feature only.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    bundled,
    error::{Error, Result},
    feature::{Feature, FeatureContext},
};

/// Builds a feature instance from its context.
pub type FeatureFactory =
    Arc<dyn Fn(&FeatureContext) -> anyhow::Result<Box<dyn Feature>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FeatureCatalog {
    factories: BTreeMap<String, FeatureFactory>,
}

impl FeatureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with the features shipped in this crate.
    pub fn with_bundled() -> Self {
        let mut catalog = Self::new();
        bundled::register_all(&mut catalog);
        catalog
    }

    /// Register a factory. A later registration replaces an earlier one.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(&FeatureContext) -> anyhow::Result<Box<dyn Feature>> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn with<F>(mut self, class: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&FeatureContext) -> anyhow::Result<Box<dyn Feature>> + Send + Sync + 'static,
    {
        self.register(class, factory);
        self
    }

    /// Register a feature type built with `Default`.
    pub fn register_default<T>(&mut self, class: impl Into<String>)
    where
        T: Feature + Default,
    {
        self.register(class, |_ctx| Ok(Box::new(T::default()) as Box<dyn Feature>));
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Registered class names, sorted.
    pub fn classes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn instantiate(&self, class: &str, ctx: &FeatureContext) -> Result<Box<dyn Feature>> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| Error::UnknownClass {
                feature: ctx.name().to_string(),
                class: class.to_string(),
            })?;
        factory(ctx).map_err(|e| Error::hook(ctx.name(), "construct", &e))
    }
}

impl fmt::Debug for FeatureCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCatalog")
            .field("classes", &self.classes())
            .finish()
    }
}
