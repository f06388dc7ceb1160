use std::time::Duration;

use dvbulk_resource::ChecksumAlgorithm;

use crate::error::EngineError;

/// Resolved, validated settings for one upload run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub server_url: String,
    pub api_key: String,
    pub dataset_pid: String,

    /// Checksum algorithm for duplicate detection and verification.
    pub algorithm: ChecksumAlgorithm,
    /// Recurse into subdirectories of directory roots.
    pub recurse: bool,
    /// Prefer direct-to-storage upload when the server offers it.
    pub direct_upload: bool,
    /// Compare checksums when deciding duplicates.
    pub verify_checksums: bool,
    /// Walk and resolve only; never invoke the transfer driver.
    pub list_only: bool,
    /// Upload even when a matching entry already exists.
    pub force_new: bool,

    /// Retry attempts beyond the initial try.
    pub max_retries: u32,
    /// Backoff base: attempt n sleeps `base_retry_delay * 2^(n-1)`.
    pub base_retry_delay: Duration,
    /// Pause between different candidates within one retry round.
    pub retry_pause: Duration,

    /// Upper bound on waiting for a dataset lock to clear.
    pub max_lock_wait: Duration,
    /// Interval between lock polls.
    pub lock_poll_interval: Duration,

    pub request_timeout: Duration,
    /// HTTP connection pool size.
    pub http_concurrency: usize,
    /// Concurrent part PUTs for one multipart upload.
    pub part_concurrency: usize,

    /// Candidates to pass over before uploading starts.
    pub skip_files: usize,
    /// Stop starting new uploads after this many succeeded.
    pub max_files: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_key: String::new(),
            dataset_pid: String::new(),
            algorithm: ChecksumAlgorithm::Md5,
            recurse: false,
            direct_upload: true,
            verify_checksums: false,
            list_only: false,
            force_new: false,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(5),
            retry_pause: Duration::from_secs(2),
            max_lock_wait: Duration::from_secs(60),
            lock_poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(1200),
            http_concurrency: 4,
            part_concurrency: 4,
            skip_files: 0,
            max_files: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.server_url.is_empty() {
            return Err(EngineError::Config("server URL is required".into()));
        }
        if self.api_key.is_empty() {
            return Err(EngineError::Config("API key is required".into()));
        }
        if self.dataset_pid.is_empty() {
            return Err(EngineError::Config(
                "dataset persistent identifier is required".into(),
            ));
        }
        if self.http_concurrency == 0 || self.part_concurrency == 0 {
            return Err(EngineError::Config(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.max_files == Some(0) {
            return Err(EngineError::Config("max_files must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RunConfig {
        RunConfig {
            server_url: "https://demo.dataverse.org".into(),
            api_key: "key".into(),
            dataset_pid: "doi:10.5072/FK2/X".into(),
            ..RunConfig::default()
        }
    }

    #[test]
    fn default_bounds_match_documented_values() {
        let c = RunConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.base_retry_delay, Duration::from_secs(5));
        assert_eq!(c.max_lock_wait, Duration::from_secs(60));
    }

    #[test]
    fn validation_requires_connection_settings() {
        assert!(valid().validate().is_ok());
        for f in [
            |c: &mut RunConfig| c.server_url.clear(),
            |c: &mut RunConfig| c.api_key.clear(),
            |c: &mut RunConfig| c.dataset_pid.clear(),
            |c: &mut RunConfig| c.part_concurrency = 0,
            |c: &mut RunConfig| c.max_files = Some(0),
        ] {
            let mut c = valid();
            f(&mut c);
            assert!(matches!(c.validate(), Err(EngineError::Config(_))));
        }
    }
}
