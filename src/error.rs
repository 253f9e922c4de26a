use thiserror::Error;

/// Internal error taxonomy for the artifact lifecycle engine and its
/// collaborators. Every variant maps to exactly one wire `code` via
/// [`AgentError::code`]; nothing here is allowed to escape a dispatched
/// command as a panicked task (`spec.md` §7).
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("missing required parameter: {0}")]
    ParamMissing(String),

    #[error("invalid parameter {field}: {reason}")]
    ParamInvalid { field: String, reason: String },

    #[error("download failed: {0}")]
    DownloadTransport(String),

    #[error("download failed: unexpected HTTP status {0}")]
    DownloadHttpStatus(u16),

    #[error("md5 mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("filesystem error: {0}")]
    FilesystemIo(String),

    #[error("archive unpack failed: {0}")]
    UnpackFailure(String),

    #[error("archive entry escapes target directory: {0}")]
    PathTraversal(String),

    #[error("catalog error: {0}")]
    CatalogIo(String),

    #[error("mqtt error: {0}")]
    Mqtt(String),

    #[error("algorithm not found: {0}")]
    NotFound(String),

    #[error("algorithm version already exists: {algorithm_id} ({local_path})")]
    Duplicate {
        algorithm_id: String,
        local_path: String,
    },
}

impl AgentError {
    /// Wire code per `spec.md` §6.
    pub fn code(&self) -> i64 {
        match self {
            AgentError::ParamMissing(_) | AgentError::ParamInvalid { .. } => 1005,
            AgentError::DownloadTransport(_) | AgentError::DownloadHttpStatus(_) => 1001,
            AgentError::HashMismatch { .. } => 1002,
            AgentError::FilesystemIo(_)
            | AgentError::UnpackFailure(_)
            | AgentError::PathTraversal(_) => 1003,
            AgentError::CatalogIo(_) => 1004,
            AgentError::NotFound(_) => 1006,
            AgentError::Duplicate { .. } => 1007,
            // Transient broker publish/subscribe failures (`spec.md` §4.1)
            // are not part of the artifact-lifecycle reply vocabulary and
            // never reach a dispatched command's `Outcome`; this code exists
            // so `AgentError` still has exactly one wire number per variant.
            AgentError::Mqtt(_) => 1008,
        }
    }

    /// Wire `data` payload that accompanies a failure reply, if any.
    /// `versionExists` (1007) is the one failure code the wire contract
    /// still attaches data to (`spec.md` §4.3 install step 1).
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            AgentError::Duplicate { local_path, .. } => {
                Some(serde_json::json!({ "localPath": local_path }))
            }
            _ => None,
        }
    }
}

/// The outcome of a single dispatched command, before it is rendered onto
/// the wire. Keeping `Warning` distinct from `Success` lets tests assert on
/// "delete of a missing algorithm" without string-matching the message
/// (`spec.md` §9 Design Notes).
#[derive(Debug)]
pub enum Outcome {
    Success(Option<serde_json::Value>),
    Warning(String),
    Failure(AgentError),
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success(None)
    }

    pub fn success_with(data: serde_json::Value) -> Self {
        Outcome::Success(Some(data))
    }

    /// `(code, message, data)` triple for the reply envelope.
    pub fn into_wire(self) -> (i64, String, Option<serde_json::Value>) {
        match self {
            Outcome::Success(data) => (0, "success".to_string(), data),
            Outcome::Warning(msg) => (0, msg, None),
            Outcome::Failure(err) => {
                let data = err.data();
                (err.code(), err.to_string(), data)
            }
        }
    }
}
