//! FEATURE.md metadata parsing.
//!
//! Feature metadata is stored as TOML frontmatter in `FEATURE.md` files:
//! ```text
//! +++
//! class = "word-filter"
//! name = "moderation"
//! description = "Drops messages containing blocked words"
//! threaded = false
//! depend = ["audit"]
//! softdepend = ["auto-reply"]
//! +++
//!
//! # Moderation
//! Extended docs go here.
//! ```
//!
//! `class`, `name` and `description` are required; `disable`, `threaded`,
//! `depend` and `softdepend` are optional. Unknown keys are rejected.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metadata parsed from a FEATURE.md file's TOML frontmatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureMetadata {
    /// Catalog key of the implementation to instantiate.
    pub class: String,
    /// Unique registry key.
    pub name: String,
    pub description: String,
    /// Never enable this feature.
    #[serde(default)]
    pub disable: bool,
    /// The feature cannot be disabled at runtime.
    #[serde(default)]
    pub threaded: bool,
    /// Features that must be enabled first.
    #[serde(default)]
    pub depend: Vec<String>,
    #[serde(default)]
    pub softdepend: Vec<String>,
}

impl FeatureMetadata {
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            description: description.into(),
            disable: false,
            threaded: false,
            depend: Vec::new(),
            softdepend: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depend.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn disabled(mut self, disable: bool) -> Self {
        self.disable = disable;
        self
    }

    /// Checks serde cannot express: non-blank identifiers and dependency names.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.class.trim().is_empty() {
            return Err("`class` must not be empty".into());
        }
        if self.name.trim().is_empty() {
            return Err("`name` must not be empty".into());
        }
        if self.name.trim() != self.name {
            return Err(format!("`name` has surrounding whitespace: {:?}", self.name));
        }
        if let Some(bad) = self
            .depend
            .iter()
            .chain(&self.softdepend)
            .find(|d| d.trim().is_empty())
        {
            return Err(format!("dependency names must not be empty: {bad:?}"));
        }
        Ok(())
    }
}

/// Full parsed feature manifest including metadata and the body text.
#[derive(Debug, Clone)]
pub struct ParsedFeature {
    pub metadata: FeatureMetadata,
    pub body: String,
    pub source_path: PathBuf,
}

impl ParsedFeature {
    /// A manifest that does not come from disk.
    pub fn inline(metadata: FeatureMetadata) -> Self {
        let source_path = PathBuf::from(format!("<inline>/{}", metadata.name));
        Self {
            metadata,
            body: String::new(),
            source_path,
        }
    }
}

/// Parse FEATURE.md content into metadata + body.
///
/// Expects TOML frontmatter delimited by `+++` lines.
pub fn parse_feature_md(content: &str, source_path: &Path) -> Result<ParsedFeature> {
    let trimmed = content.trim_start();
    let Some(after_first) = trimmed.strip_prefix("+++") else {
        return Err(Error::invalid_metadata(
            source_path,
            "FEATURE.md must start with +++ TOML frontmatter",
        ));
    };

    let end = after_first.find("\n+++").ok_or_else(|| {
        Error::invalid_metadata(source_path, "missing closing +++ in FEATURE.md frontmatter")
    })?;

    let toml_str = after_first[..end].trim();
    let body = after_first
        .get(end + 4..)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let metadata: FeatureMetadata = toml::from_str(toml_str)
        .map_err(|e| Error::invalid_metadata(source_path, e.message()))?;
    metadata
        .validate()
        .map_err(|reason| Error::invalid_metadata(source_path, reason))?;

    Ok(ParsedFeature {
        metadata,
        body,
        source_path: source_path.to_path_buf(),
    })
}
