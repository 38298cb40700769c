use esbox_proto::{codes, ErrorInfo};
use std::time::Duration;
use thiserror::Error;

/// Pool-level error type.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Engine artifact fetch or worker setup failed; fatal from `init`.
    #[error("POOL_BOOTSTRAP_FAILED: {0}")]
    Bootstrap(String),

    /// The bounded queue did not grant a slot in time.
    #[error("POOL_QUEUE_TIMEOUT: no worker slot granted within {0:?}")]
    QueueTimeout(Duration),

    /// A worker disappeared while holding the task.
    #[error("POOL_WORKER_LOST: {0}")]
    WorkerLost(String),

    /// The requested engine version predates the supported minimum.
    #[error("ENGINE_VERSION_UNSUPPORTED: {0}")]
    UnsupportedVersion(String),

    /// Both CDNs failed to deliver the engine artifact.
    #[error("ENGINE_FETCH_FAILED: {0}")]
    ArtifactFetch(String),

    /// A terminal reject routed back from a worker (including reload aborts).
    #[error("{code}: {message}")]
    Task { code: String, message: String },

    #[error("INTERNAL_ERROR: {0}")]
    Internal(String),
}

impl PoolError {
    #[must_use]
    pub fn from_info(info: ErrorInfo) -> Self {
        Self::Task {
            code: info.code,
            message: info.message,
        }
    }

    /// True when this error is a reload abort.
    #[must_use]
    pub fn is_reload_abort(&self) -> bool {
        matches!(self, Self::Task { code, .. } if code == codes::POOL_RELOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esbox_proto::RELOAD_ABORT_REASON;

    #[test]
    fn test_reload_abort_matches_reload_pattern() {
        let err = PoolError::from_info(ErrorInfo::new(codes::POOL_RELOAD, RELOAD_ABORT_REASON));
        assert!(err.is_reload_abort());
        assert!(err.to_string().to_lowercase().contains("reload"));
    }

    #[test]
    fn test_queue_timeout_display() {
        let err = PoolError::QueueTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("POOL_QUEUE_TIMEOUT"));
    }
}
