/// Errors from the Dataverse API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("authentication rejected: {body}")]
    Auth { body: String },

    #[error("request rejected ({status}): {body}")]
    Validation { status: u16, body: String },

    #[error("dataset locked: {0}")]
    Locked(String),

    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Maps an HTTP status and response body to an error variant.
    ///
    /// 401/403 are credential failures; 423 (and lock-flavored 4xx bodies)
    /// mean the dataset is busy; 429 and 5xx are transient; remaining 4xx
    /// are permanent request errors.
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth { body },
            423 => Self::Locked(body),
            429 => Self::Server { status, body },
            400 | 409 if body_mentions_lock(&body) => Self::Locked(body),
            s if s >= 500 => Self::Server { status, body },
            _ => Self::Validation { status, body },
        }
    }

    /// Transient failures are eligible for retry with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Server { .. } => true,
            Self::Auth { .. }
            | Self::Validation { .. }
            | Self::Locked(_)
            | Self::Protocol(_)
            | Self::Io(_) => false,
        }
    }

    /// Lock conflicts are routed to the lock waiter instead of plain retry.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Locked(_))
    }

    /// `true` when the server does not offer the requested endpoint at all
    /// (used to fall back from direct to proxied upload).
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Validation { status: 404, .. })
    }
}

fn body_mentions_lock(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("lock") || lower.contains("dataset is busy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_permanent() {
        for status in [401, 403] {
            let e = ApiError::from_status(status, "bad key".into());
            assert!(matches!(e, ApiError::Auth { .. }));
            assert!(!e.is_transient());
        }
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [429, 500, 502, 503] {
            let e = ApiError::from_status(status, "busy".into());
            assert!(e.is_transient(), "status {status} should be transient");
        }
    }

    #[test]
    fn lock_conflicts_are_detected() {
        let e = ApiError::from_status(423, "ingest in progress".into());
        assert!(e.is_lock_conflict());

        let e = ApiError::from_status(400, "Dataset is locked for Ingest".into());
        assert!(e.is_lock_conflict());

        let e = ApiError::from_status(400, "bad request".into());
        assert!(!e.is_lock_conflict());
        assert!(matches!(e, ApiError::Validation { .. }));
    }

    #[test]
    fn not_found_marks_unsupported() {
        let e = ApiError::from_status(404, "unknown api".into());
        assert!(e.is_unsupported());
        assert!(!e.is_transient());
    }
}
