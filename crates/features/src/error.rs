use std::path::{Path, PathBuf};

use {roost_common::FromMessage, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bus(#[from] roost_common::Error),

    #[error("invalid feature manifest at {path}: {reason}")]
    InvalidMetadata { path: PathBuf, reason: String },

    #[error("feature '{feature}' names unknown class '{class}'")]
    UnknownClass { feature: String, class: String },

    #[error("feature '{name}' is already loaded")]
    DuplicateFeature { name: String },

    #[error("feature '{name}' not found")]
    NotFound { name: String },

    #[error("feature '{feature}' is missing dependencies: {}", missing.join(", "))]
    MissingDependencies {
        feature: String,
        missing: Vec<String>,
    },

    #[error("invalid config for feature '{feature}': {reason}")]
    InvalidConfig { feature: String, reason: String },

    /// A lifecycle hook (`on_load`, `on_enable`, `on_disable`) failed.
    #[error("feature '{feature}' failed to {phase}: {reason}")]
    Hook {
        feature: String,
        phase: &'static str,
        reason: String,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_metadata(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    #[must_use]
    pub fn hook(feature: impl Into<String>, phase: &'static str, source: &anyhow::Error) -> Self {
        Self::Hook {
            feature: feature.into(),
            phase,
            reason: format!("{source:#}"),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

roost_common::impl_context!();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dependencies_lists_names() {
        let err = Error::MissingDependencies {
            feature: "a".into(),
            missing: vec!["b".into(), "c".into()],
        };
        assert_eq!(err.to_string(), "feature 'a' is missing dependencies: b, c");
    }

    #[test]
    fn hook_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("socket closed").context("connect");
        let err = Error::hook("relay", "enable", &cause);
        assert_eq!(
            err.to_string(),
            "feature 'relay' failed to enable: connect: socket closed"
        );
    }

    #[test]
    fn invalid_metadata_names_path() {
        let err = Error::invalid_metadata(Path::new("/f/x/FEATURE.md"), "missing field `class`");
        assert!(err.to_string().contains("/f/x/FEATURE.md"));
        assert!(err.to_string().contains("class"));
    }
}
