use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AgentError;

/// `config.yaml` file structure: `algo.runStatus ∈ {0,1}` (`spec.md` §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RunStatusFile {
    algo: AlgoSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AlgoSection {
    #[serde(rename = "runStatus")]
    run_status: i64,
}

/// Read/write of a per-artifact YAML file holding an integer run flag
/// (component D).
pub struct RunStatusGateway;

impl RunStatusGateway {
    /// Read `algo.runStatus`. Per `spec.md` §4.3 list-with-status: a
    /// missing file, unparseable YAML, or an out-of-range value all default
    /// to `0` and are logged rather than surfaced as an error.
    pub fn read(path: &Path) -> i64 {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "run-status file unreadable, defaulting to 0");
                return 0;
            }
        };
        let parsed: Result<RunStatusFile, _> = serde_yaml::from_slice(&bytes);
        match parsed {
            Ok(file) if file.algo.run_status == 0 || file.algo.run_status == 1 => {
                file.algo.run_status
            }
            Ok(file) => {
                warn!(
                    path = %path.display(),
                    run_status = file.algo.run_status,
                    "run-status value out of range, defaulting to 0"
                );
                0
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "run-status file unparseable, defaulting to 0");
                0
            }
        }
    }

    /// Read-modify-write `algo.runStatus`, creating the file if absent so a
    /// freshly unpacked artifact without a shipped `config.yaml` can still
    /// be toggled (`spec.md` §4.3 set-run-status).
    pub fn write(path: &Path, run_status: i64) -> Result<(), AgentError> {
        let current = match std::fs::read(path) {
            Ok(bytes) => serde_yaml::from_slice(&bytes).unwrap_or(RunStatusFile {
                algo: AlgoSection { run_status: 0 },
            }),
            Err(_) => RunStatusFile {
                algo: AlgoSection { run_status: 0 },
            },
        };
        let updated = RunStatusFile {
            algo: AlgoSection { run_status },
            ..current
        };
        let encoded =
            serde_yaml::to_string(&updated).map_err(|e| AgentError::FilesystemIo(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::FilesystemIo(e.to_string()))?;
        }
        std::fs::write(path, encoded).map_err(|e| AgentError::FilesystemIo(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o644);
            let _ = std::fs::set_permissions(path, perms);
        }

        Ok(())
    }
}
