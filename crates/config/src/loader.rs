use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::RoostConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["roost.toml", "roost.yaml", "roost.yml", "roost.json"];

/// Load config from the given path (any supported format).
///
/// A relative `host.features_dir` is resolved against the config file's
/// directory.
pub fn load_config(path: &Path) -> Result<RoostConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;

    if config.host.features_dir.is_relative()
        && let Some(base) = path.parent()
    {
        config.host.features_dir = base.join(&config.host.features_dir);
    }

    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./roost.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/roost/roost.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RoostConfig::default()` if no config file is found or it fails to
/// parse.
pub fn discover_and_load() -> RoostConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    RoostConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/roost/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "roost").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<RoostConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_and_resolves_features_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("roost.toml");
        std::fs::write(
            &path,
            r#"
[host]
features_dir = "plugins"
events = ["ready", "message"]

[features.auto-reply.triggers]
hello = "hi there"
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.host.features_dir, tmp.path().join("plugins"));
        assert_eq!(cfg.host.events, vec!["ready", "message"]);
        assert_eq!(
            cfg.feature_config("auto-reply")["triggers"]["hello"],
            "hi there"
        );
    }

    #[test]
    fn absolute_features_dir_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("roost.json");
        std::fs::write(&path, r#"{"host": {"features_dir": "/opt/roost/features"}}"#).unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.host.features_dir, PathBuf::from("/opt/roost/features"));
    }

    #[test]
    fn loads_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("roost.yaml");
        std::fs::write(
            &path,
            "host:\n  handler_timeout_secs: 2\nfeatures:\n  word-filter:\n    words: [spam]\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.host.handler_timeout_secs, Some(2));
        assert_eq!(cfg.feature_config("word-filter")["words"][0], "spam");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("roost.toml");
        std::fs::write(&path, "[host\nfeatures_dir = 1").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("roost.ini");
        std::fs::write(&path, "").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension } if extension == "ini"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/roost.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/roost.toml"));
    }
}
