use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::catalog::{AlgorithmRecord, Catalog};
use crate::downloader::Downloader;
use crate::envelope::{AlgorithmAddParams, AlgorithmShowEntry};
use crate::error::{AgentError, Outcome};
use crate::layout::ArtifactLayout;
use crate::run_status::RunStatusGateway;

/// Per-`algorithmId` mutual exclusion so install/delete/config for the same
/// artifact never interleave, while distinct artifacts proceed concurrently
/// (`spec.md` §4.2 "Command serialization").
#[derive(Clone, Default)]
struct KeyedLocks {
    locks: Arc<SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Implements install/delete/list/set-run-status over a `Catalog` and the
/// on-disk artifact layout (component E). Owns the serialization guarantee:
/// two commands targeting the same `algorithmId` never race, while commands
/// for distinct artifacts run in parallel.
#[derive(Clone)]
pub struct ArtifactLifecycleEngine {
    catalog: Catalog,
    layout: ArtifactLayout,
    downloader: Arc<Downloader>,
    locks: KeyedLocks,
}

impl ArtifactLifecycleEngine {
    pub fn new(catalog: Catalog, layout: ArtifactLayout) -> Self {
        Self {
            catalog,
            layout,
            downloader: Arc::new(Downloader::new()),
            locks: KeyedLocks::default(),
        }
    }

    /// `spec.md` §4.3 install: 9-step sequence — validate params, check for
    /// an existing identical version (duplicate short-circuit), download +
    /// verify + unpack under the per-artifact lock, then commit the catalog
    /// record only after the filesystem succeeded.
    pub async fn install(&self, params: AlgorithmAddParams) -> Outcome {
        if params.algorithm_id.is_empty() {
            return Outcome::Failure(AgentError::ParamMissing("algorithmId".to_string()));
        }
        if params.algorithm_data_url.is_empty() {
            return Outcome::Failure(AgentError::ParamMissing("algorithmDataUrl".to_string()));
        }
        if params.md5.is_empty() {
            return Outcome::Failure(AgentError::ParamMissing("md5".to_string()));
        }

        let guard = self.locks.lock_for(&params.algorithm_id);
        let _permit = guard.lock().await;

        let prior = match self.catalog.get(&params.algorithm_id) {
            Ok(prior) => prior,
            Err(e) => return Outcome::Failure(e),
        };
        if let Some(existing) = &prior {
            if existing.algorithm_version == params.algorithm_version {
                return Outcome::Failure(AgentError::Duplicate {
                    algorithm_id: params.algorithm_id.clone(),
                    local_path: existing.local_path.clone(),
                });
            }
        }

        let algorithm_dir = self.layout.algorithm_dir(&params.algorithm_id);
        let version_dir = self
            .layout
            .version_dir(&params.algorithm_id, &params.algorithm_version_id);

        if let Err(e) = self
            .downloader
            .install(
                &version_dir,
                &algorithm_dir,
                &params.algorithm_data_url,
                &params.md5,
            )
            .await
        {
            return Outcome::Failure(e);
        }

        let record = AlgorithmRecord {
            algorithm_id: params.algorithm_id.clone(),
            algorithm_name: params.algorithm_name.clone(),
            algorithm_version: params.algorithm_version.clone(),
            algorithm_version_id: params.algorithm_version_id.clone(),
            algorithm_data_url: params.algorithm_data_url.clone(),
            file_size: params.file_size.0,
            md5: params.md5.clone(),
            local_path: version_dir.to_string_lossy().into_owned(),
            created_at: None,
            updated_at: None,
        };

        // `spec.md` §4.3 install step 8: when replacing an existing artifact,
        // the prior version's directory is removed only after the new
        // version's files are safely on disk, and the catalog record is
        // updated in place (preserving `created_at`) rather than re-inserted.
        let commit = match &prior {
            Some(existing) => {
                let prior_path = std::path::PathBuf::from(&existing.local_path);
                if prior_path.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&prior_path) {
                        warn!(path = %prior_path.display(), error = %e, "failed to remove prior version directory");
                    }
                }
                self.catalog.update(record)
            }
            None => self.catalog.insert(record),
        };

        match commit {
            Ok(()) => {
                info!(algorithm_id = %params.algorithm_id, version = %params.algorithm_version, "algorithm installed");
                Outcome::success_with(json!({
                    "localPath": version_dir.to_string_lossy(),
                    "algorithmId": params.algorithm_id,
                    "version": params.algorithm_version,
                }))
            }
            Err(e) => Outcome::Failure(e),
        }
    }

    /// `spec.md` §4.3 delete: idempotent — deleting an unknown `algorithmId`
    /// is a `Warning`, not a `Failure`. Removes the whole `base/<algorithmId>`
    /// directory, then the catalog record.
    pub async fn delete(&self, algorithm_id: &str) -> Outcome {
        if algorithm_id.is_empty() {
            return Outcome::Failure(AgentError::ParamMissing("algorithmId".to_string()));
        }

        let guard = self.locks.lock_for(algorithm_id);
        let _permit = guard.lock().await;

        let existing = match self.catalog.get(algorithm_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Outcome::Warning(format!("algorithm {algorithm_id} is not installed"));
            }
            Err(e) => return Outcome::Failure(e),
        };

        let algorithm_dir = self.layout.algorithm_dir(algorithm_id);
        if algorithm_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&algorithm_dir) {
                return Outcome::Failure(AgentError::FilesystemIo(format!(
                    "remove {}: {e}",
                    algorithm_dir.display()
                )));
            }
        }

        if let Err(e) = self.catalog.remove(algorithm_id) {
            return Outcome::Failure(e);
        }

        info!(algorithm_id, version = %existing.algorithm_version, "algorithm deleted");
        Outcome::success_with(json!({ "algorithmId": algorithm_id }))
    }

    /// `spec.md` §4.3 list-with-status: every catalog record plus its
    /// run-status flag read fresh from `config.yaml` (never cached —
    /// an operator can edit the file directly between calls).
    pub fn list(&self) -> Result<Vec<AlgorithmShowEntry>, AgentError> {
        let records = self.catalog.list()?;
        Ok(records
            .into_iter()
            .map(|record| {
                let run_status_path = self
                    .layout
                    .run_status_path(&record.algorithm_id, &record.algorithm_version_id);
                AlgorithmShowEntry {
                    algorithm_name: record.algorithm_name,
                    algorithm_id: record.algorithm_id,
                    algorithm_version: record.algorithm_version,
                    run_status: RunStatusGateway::read(&run_status_path),
                }
            })
            .collect())
    }

    /// `spec.md` §4.3 set-run-status: writes `config.yaml` for the
    /// currently-installed version of `algorithm_id`. Unknown artifact is a
    /// `Failure` (`algorithmNotFound`), unlike delete's idempotent warning,
    /// because there is nothing sensible to configure.
    pub async fn set_run_status(&self, algorithm_id: &str, run_status: i64) -> Outcome {
        if algorithm_id.is_empty() {
            return Outcome::Failure(AgentError::ParamMissing("algorithmId".to_string()));
        }
        if run_status != 0 && run_status != 1 {
            return Outcome::Failure(AgentError::ParamInvalid {
                field: "runStatus".to_string(),
                reason: "must be 0 or 1".to_string(),
            });
        }

        let guard = self.locks.lock_for(algorithm_id);
        let _permit = guard.lock().await;

        let record = match self.catalog.get(algorithm_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Outcome::Failure(AgentError::NotFound(algorithm_id.to_string()));
            }
            Err(e) => return Outcome::Failure(e),
        };

        let path = self
            .layout
            .run_status_path(algorithm_id, &record.algorithm_version_id);
        match RunStatusGateway::write(&path, run_status) {
            Ok(()) => {
                info!(algorithm_id, run_status, "run status updated");
                Outcome::success_with(json!({ "algorithmId": algorithm_id, "runStatus": run_status }))
            }
            Err(e) => Outcome::Failure(e),
        }
    }
}
