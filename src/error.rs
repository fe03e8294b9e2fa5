//! Error taxonomy for the worker core (spec §7).
//!
//! Each variant maps onto one of the source's six error classes. The
//! taxonomy is closed and matchable — callers decide retry/backoff/report
//! behavior by matching on these, never by string-sniffing a message.

use std::path::PathBuf;

/// Fatal at startup: missing/malformed manifest, duplicate topics,
/// unresolvable secrets provider.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("manifest not found at {0}")]
    ManifestMissing(PathBuf),

    #[error("malformed manifest at {path}: {source}")]
    ManifestMalformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("topic '{0}' is declared by more than one package")]
    DuplicateTopic(String),

    #[error("topic '{topic}' references unknown secret profile '{profile}'")]
    UnknownSecretProfile { topic: String, profile: String },

    #[error("archive at {0} could not be read: {1}")]
    UnreadableArchive(PathBuf, String),

    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Errors from calling the engine's REST surface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// HTTP 5xx, connection reset, or a timeout on a non-long-poll call.
    /// The call site retries with backoff; this error never crashes the
    /// scheduler.
    #[error("transient engine error: {0}")]
    Transient(String),

    /// HTTP 4xx other than 404/409.
    #[error("permanent engine error (HTTP {status}): {body}")]
    Permanent { status: u16, body: String },

    /// 404/409 on extend or terminal report: the lease is gone or the lock
    /// was lost. Not an error the caller should log loudly — it means
    /// another worker (or the engine itself) already reclaimed the task.
    #[error("lease lost (engine returned {status})")]
    LeaseLost { status: u16 },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode engine response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl EngineError {
    /// Classify an HTTP status code per spec §6/§7.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            404 | 409 => EngineError::LeaseLost {
                status: status.as_u16(),
            },
            s if s >= 500 => EngineError::Transient(body),
            s => EngineError::Permanent { status: s, body },
        }
    }

    /// True for 404/409 — the lease is gone, not a failure to surface.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, EngineError::LeaseLost { .. })
    }

    /// True for errors that warrant exponential backoff and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_) | EngineError::Transport(_))
    }
}

/// Subprocess failed to start, crashed, produced malformed outputs, or
/// exceeded the deadline.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to spawn executor subprocess: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("executor subprocess exited with status {status}, stderr tail: {stderr_tail}")]
    NonZeroExit { status: i32, stderr_tail: String },

    #[error("executor did not produce {0}")]
    MissingOutputs(PathBuf),

    #[error("outputs file at {path} is malformed: {source}")]
    MalformedOutputs {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("executor exceeded the deadline of {0:?} and was force-terminated")]
    DeadlineExceeded(std::time::Duration),

    #[error("lock lost mid-execution; subprocess terminated")]
    LockLost,

    #[error("worker is shutting down; lease abandoned")]
    ShuttingDown,

    #[error("workspace materialization failed: {0}")]
    Workspace(#[from] std::io::Error),
}
