//! Feature manifest discovery.
//!
//! Scans a configured directory for `<dir>/FEATURE.md` manifests. Every
//! candidate is returned, parsed or not, so the manager can report failures
//! per file while the rest keep loading.

use std::path::PathBuf;

use {async_trait::async_trait, tracing::debug};

use crate::{
    error::{Context, Error, Result},
    metadata::{FeatureMetadata, ParsedFeature, parse_feature_md},
};

pub const MANIFEST_FILE: &str = "FEATURE.md";

/// One discovered manifest and its parse outcome.
#[derive(Debug)]
pub struct Candidate {
    pub path: PathBuf,
    pub parsed: Result<ParsedFeature>,
}

/// Produces feature manifests for the manager to load.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<Candidate>>;
}

/// Filesystem-based discoverer.
pub struct FsFeatureSource {
    dir: PathBuf,
}

impl FsFeatureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FeatureSource for FsFeatureSource {
    /// Candidates come back sorted by path so load order is stable.
    async fn discover(&self) -> Result<Vec<Candidate>> {
        if !self.dir.is_dir() {
            debug!(dir = %self.dir.display(), "features directory does not exist");
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let manifest = entry.path().join(MANIFEST_FILE);
            if manifest.is_file() {
                manifests.push(manifest);
            }
        }
        manifests.sort();

        let mut candidates = Vec::with_capacity(manifests.len());
        for path in manifests {
            let parsed = match tokio::fs::read_to_string(&path).await {
                Ok(content) => parse_feature_md(&content, &path),
                Err(e) => Err(e.into()),
            };
            candidates.push(Candidate { path, parsed });
        }

        debug!(dir = %self.dir.display(), count = candidates.len(), "discovered feature manifests");
        Ok(candidates)
    }
}

/// In-memory manifests, for embedding hosts that declare features in code.
#[derive(Default)]
pub struct StaticFeatureSource {
    manifests: Vec<FeatureMetadata>,
}

impl StaticFeatureSource {
    pub fn new(manifests: Vec<FeatureMetadata>) -> Self {
        Self { manifests }
    }
}

#[async_trait]
impl FeatureSource for StaticFeatureSource {
    async fn discover(&self) -> Result<Vec<Candidate>> {
        Ok(self
            .manifests
            .iter()
            .map(|metadata| {
                let parsed = ParsedFeature::inline(metadata.clone());
                let path = parsed.source_path.clone();
                let parsed = metadata
                    .validate()
                    .map(|()| parsed)
                    .map_err(|reason| Error::invalid_metadata(&path, reason));
                Candidate { path, parsed }
            })
            .collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn write_manifest(root: &Path, dir: &str, content: &str) {
        std::fs::create_dir_all(root.join(dir)).unwrap();
        std::fs::write(root.join(dir).join(MANIFEST_FILE), content).unwrap();
    }

    #[tokio::test]
    async fn discovers_sorted_manifests() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "zeta",
            "+++\nclass = \"c\"\nname = \"zeta\"\ndescription = \"z\"\n+++\n",
        );
        write_manifest(
            tmp.path(),
            "alpha",
            "+++\nclass = \"c\"\nname = \"first\"\ndescription = \"a\"\n+++\n",
        );

        let found = FsFeatureSource::new(tmp.path()).discover().await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].parsed.as_ref().unwrap().metadata.name, "first");
        assert_eq!(found[1].parsed.as_ref().unwrap().metadata.name, "zeta");
    }

    #[tokio::test]
    async fn invalid_manifest_is_returned_as_failure() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "bad", "no frontmatter");
        write_manifest(
            tmp.path(),
            "good",
            "+++\nclass = \"c\"\nname = \"good\"\ndescription = \"g\"\n+++\n",
        );

        let found = FsFeatureSource::new(tmp.path()).discover().await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].path.ends_with("bad/FEATURE.md"));
        assert!(found[0].parsed.is_err());
        assert!(found[1].parsed.is_ok());
    }

    #[tokio::test]
    async fn skips_dirs_without_manifest_and_loose_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("not-a-feature")).unwrap();
        std::fs::write(tmp.path().join("not-a-feature/README.md"), "hello").unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILE), "+++\n+++\n").unwrap();

        let found = FsFeatureSource::new(tmp.path()).discover().await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn missing_dir_yields_nothing() {
        let found = FsFeatureSource::new("/nonexistent/features")
            .discover()
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn static_source_validates() {
        let source = StaticFeatureSource::new(vec![
            FeatureMetadata::new("c", "ok", "d"),
            FeatureMetadata::new("", "broken", "d"),
        ]);
        let found = source.discover().await.unwrap();
        assert!(found[0].parsed.is_ok());
        assert!(found[1].parsed.is_err());
    }
}
