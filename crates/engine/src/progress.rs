use std::time::Duration;

use crate::stats::TransferOutcome;

/// Per-candidate progress events, emitted over an mpsc channel for the
/// caller's progress rendering. The engine never blocks on a slow or
/// dropped consumer.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Processing of a candidate has begun.
    Started { path: String, size: u64 },
    /// A candidate reached an outcome. `run_bytes` is the cumulative byte
    /// count uploaded so far in this run.
    Outcome {
        path: String,
        outcome: TransferOutcome,
        run_bytes: u64,
    },
    /// A transiently-failed candidate will be retried.
    RetryScheduled {
        path: String,
        attempt: u32,
        delay: Duration,
    },
    /// Transfers are paused until the dataset lock clears.
    WaitingForLock { path: String },
}
