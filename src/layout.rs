use std::path::{Path, PathBuf};

/// On-disk convention for unpacked artifacts (`spec.md` §3 `ArtifactLayout`).
///
/// Resolves the Open Question in `spec.md` §9 by using one layout
/// consistently: `base/<algorithmId>/<algorithmVersionId>/...` for both
/// install and delete (see `SPEC_FULL.md` §9).
#[derive(Clone, Debug)]
pub struct ArtifactLayout {
    base: PathBuf,
}

impl ArtifactLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `base/<algorithmId>` — the whole-artifact directory removed by delete.
    pub fn algorithm_dir(&self, algorithm_id: &str) -> PathBuf {
        self.base.join(algorithm_id)
    }

    /// `base/<algorithmId>/<algorithmVersionId>` — where a version's
    /// unpacked files live.
    pub fn version_dir(&self, algorithm_id: &str, algorithm_version_id: &str) -> PathBuf {
        self.algorithm_dir(algorithm_id).join(algorithm_version_id)
    }

    /// `base/<algorithmId>/<algorithmVersionId>/config.yaml`
    pub fn run_status_path(&self, algorithm_id: &str, algorithm_version_id: &str) -> PathBuf {
        self.version_dir(algorithm_id, algorithm_version_id)
            .join("config.yaml")
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}
