use std::path::PathBuf;
use std::time::Duration;

use dvbulk_api::ApiError;
use dvbulk_resource::{ResourceError, WalkError};

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Eligible for retry with backoff.
    Transient,
    /// Never retried; recorded as a terminal failure.
    Permanent,
    /// Routed to the lock waiter before the next attempt.
    LockConflict,
}

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error("checksum mismatch for {path}: local {local}, remote {remote}")]
    ChecksumMismatch {
        path: PathBuf,
        local: String,
        remote: String,
    },

    #[error("dataset still locked after {}s", waited.as_secs())]
    LockTimeout { waited: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,
}

impl EngineError {
    /// Classifies this error for the retry controller.
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::Api(e) if e.is_lock_conflict() => FailureClass::LockConflict,
            Self::Api(e) if e.is_transient() => FailureClass::Transient,
            // A bounded lock wait that ran out may clear by the next
            // retry round.
            Self::LockTimeout { .. } => FailureClass::Transient,
            Self::Api(_)
            | Self::Resource(_)
            | Self::Walk(_)
            | Self::ChecksumMismatch { .. }
            | Self::Config(_)
            | Self::Cancelled => FailureClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_classify_through() {
        let e = EngineError::Api(ApiError::Server {
            status: 503,
            body: "busy".into(),
        });
        assert_eq!(e.classify(), FailureClass::Transient);

        let e = EngineError::Api(ApiError::Auth { body: "no".into() });
        assert_eq!(e.classify(), FailureClass::Permanent);

        let e = EngineError::Api(ApiError::Locked("ingest".into()));
        assert_eq!(e.classify(), FailureClass::LockConflict);
    }

    #[test]
    fn local_io_is_permanent() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = EngineError::Resource(ResourceError::Io(io));
        assert_eq!(e.classify(), FailureClass::Permanent);
    }

    #[test]
    fn checksum_mismatch_is_permanent() {
        let e = EngineError::ChecksumMismatch {
            path: PathBuf::from("a.bin"),
            local: "aa".into(),
            remote: "bb".into(),
        };
        assert_eq!(e.classify(), FailureClass::Permanent);
    }

    #[test]
    fn lock_timeout_is_retried_later() {
        let e = EngineError::LockTimeout {
            waited: Duration::from_secs(60),
        };
        assert_eq!(e.classify(), FailureClass::Transient);
    }
}
