use std::sync::Mutex;

/// Terminal (or deferred) result for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded {
        /// Persistent identifier assigned by the repository.
        id: String,
        bytes: u64,
    },
    SkippedDuplicate {
        existing_id: String,
        matched_label: String,
    },
    Failed {
        reason: String,
    },
    /// Not terminal: the candidate re-enters the retry queue.
    DeferredRetry,
}

/// Accumulated counters for one run. Incremented from the orchestrator
/// loop under a lock; a retried candidate is only recorded once, with its
/// terminal outcome.
#[derive(Default)]
pub struct RunStats {
    inner: Mutex<Inner>,
}

#[derive(Default, Clone)]
struct Inner {
    processed: u64,
    uploaded: u64,
    skipped: u64,
    failed: u64,
    uploaded_bytes: u64,
    failures: Vec<(String, String)>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a terminal outcome for `label_path`. `DeferredRetry` is
    /// ignored — the retry controller replaces it with a terminal outcome
    /// later.
    pub fn record(&self, label_path: &str, outcome: &TransferOutcome) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match outcome {
            TransferOutcome::Uploaded { bytes, .. } => {
                inner.processed += 1;
                inner.uploaded += 1;
                inner.uploaded_bytes += bytes;
            }
            TransferOutcome::SkippedDuplicate { .. } => {
                inner.processed += 1;
                inner.skipped += 1;
            }
            TransferOutcome::Failed { reason } => {
                inner.processed += 1;
                inner.failed += 1;
                inner
                    .failures
                    .push((label_path.to_string(), reason.clone()));
            }
            TransferOutcome::DeferredRetry => {}
        }
    }

    /// Immutable snapshot of the counters.
    pub fn snapshot(&self) -> RunSummary {
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        RunSummary {
            processed: inner.processed,
            uploaded: inner.uploaded,
            skipped: inner.skipped,
            failed: inner.failed,
            uploaded_bytes: inner.uploaded_bytes,
            failures: inner.failures.clone(),
        }
    }
}

/// End-of-run statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub uploaded_bytes: u64,
    /// Permanently-failed paths with their terminal error reason.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
