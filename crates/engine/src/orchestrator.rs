//! Top-level run loop: walk, resolve, transfer, wait, retry, summarize.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dvbulk_resource::{UploadCandidate, Walker};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::convert::ConversionTable;
use crate::error::{EngineError, FailureClass};
use crate::inventory::{InventorySnapshot, RemoteEntry, RemoteInventory};
use crate::lock::{LockWait, await_unlocked};
use crate::progress::UploadEvent;
use crate::repository::Repository;
use crate::resolver::{DuplicateResolver, Resolution};
use crate::retry::RetryPolicy;
use crate::stats::{RunStats, RunSummary, TransferOutcome};

const EVENT_BUFFER: usize = 256;

/// A candidate whose last attempt failed transiently, queued for the
/// next retry round.
struct Deferred {
    candidate: UploadCandidate,
    last_error: String,
}

/// Drives one bulk upload run against an injected [`Repository`].
pub struct Uploader {
    config: RunConfig,
    repo: Arc<dyn Repository>,
    resolver: DuplicateResolver,
    inventory: RemoteInventory,
    stats: RunStats,
    policy: RetryPolicy,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<UploadEvent>>,
}

impl Uploader {
    pub fn new(config: RunConfig, repo: Arc<dyn Repository>) -> Result<Self, EngineError> {
        config.validate()?;
        let resolver = DuplicateResolver::new(
            ConversionTable::default(),
            config.algorithm,
            config.verify_checksums,
            config.force_new,
        );
        let policy = RetryPolicy::new(config.max_retries, config.base_retry_delay);
        Ok(Self {
            config,
            repo,
            resolver,
            inventory: RemoteInventory::new(),
            stats: RunStats::new(),
            policy,
            cancel: CancellationToken::new(),
            events: None,
        })
    }

    /// Token that stops the run: no new candidates are started, in-flight
    /// requests finish on their own timeouts, and `run` returns the
    /// partial summary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Creates the progress event channel. Events are dropped, never
    /// awaited, when the consumer falls behind.
    pub fn subscribe(&mut self) -> mpsc::Receiver<UploadEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.events = Some(tx);
        rx
    }

    /// Runs the full pipeline over `roots` and returns the summary.
    ///
    /// Fails fast only when the dataset itself is unreachable or the
    /// credential is rejected; every later error stays local to its
    /// candidate.
    pub async fn run(&self, roots: &[PathBuf]) -> Result<RunSummary, EngineError> {
        self.repo.dataset_check().await?;
        self.refresh_inventory().await?;
        info!(
            entries = self.inventory.current().len(),
            "loaded remote inventory"
        );

        let mut deferred: Vec<Deferred> = Vec::new();
        // Files already uploaded in this run; lets later candidates with
        // the same label or content resolve as duplicates without a full
        // inventory refresh.
        let mut additions: Vec<RemoteEntry> = Vec::new();
        let mut seen = 0usize;
        let mut uploaded_files = 0usize;

        for item in Walker::new(roots, self.config.recurse) {
            if self.cancel.is_cancelled() {
                info!("cancelled, not starting further candidates");
                break;
            }
            let candidate = match item {
                Ok(c) => c,
                Err(e) => {
                    let path = e.path().display().to_string();
                    let reason = EngineError::from(e).to_string();
                    self.finish(&path, TransferOutcome::Failed { reason });
                    continue;
                }
            };

            seen += 1;
            if seen <= self.config.skip_files {
                debug!(path = %candidate.label_path(), "skipped by offset");
                continue;
            }
            if let Some(max) = self.config.max_files {
                if uploaded_files >= max {
                    info!(max, "upload limit reached, stopping the walk");
                    break;
                }
            }

            self.emit(UploadEvent::Started {
                path: candidate.label_path(),
                size: candidate.size(),
            });
            let snapshot = self.inventory.current();
            match self.attempt(&candidate, &snapshot, &additions).await {
                Ok(Some(outcome)) => {
                    self.note_upload(&candidate, &outcome, &mut additions, &mut uploaded_files);
                    self.finish(&candidate.label_path(), outcome);
                }
                Ok(None) => {}
                Err(e) => self.dispatch_failure(candidate, e, &mut deferred).await,
            }
        }

        self.retry_rounds(deferred, &mut additions, &mut uploaded_files)
            .await;
        Ok(self.stats.snapshot())
    }

    /// Resolves one candidate and, unless it is a duplicate or the run is
    /// list-only, transfers it. `Ok(None)` means list-only would upload.
    async fn attempt(
        &self,
        candidate: &UploadCandidate,
        snapshot: &InventorySnapshot,
        additions: &[RemoteEntry],
    ) -> Result<Option<TransferOutcome>, EngineError> {
        if let Resolution::Duplicate {
            existing_id,
            matched_label,
            ..
        } = self.resolver.resolve(candidate, snapshot)?
        {
            return Ok(Some(TransferOutcome::SkippedDuplicate {
                existing_id,
                matched_label,
            }));
        }
        if let Some((existing_id, matched_label)) = self.run_duplicate(candidate, additions)? {
            return Ok(Some(TransferOutcome::SkippedDuplicate {
                existing_id,
                matched_label,
            }));
        }

        if self.config.list_only {
            debug!(path = %candidate.label_path(), "would upload");
            return Ok(None);
        }

        if candidate.is_directory() {
            let id = self.repo.ensure_directory(&candidate.label_path()).await?;
            return Ok(Some(TransferOutcome::Uploaded { id, bytes: 0 }));
        }
        let receipt = self.repo.upload_file(candidate).await?;
        Ok(Some(TransferOutcome::Uploaded {
            id: receipt.id,
            bytes: receipt.bytes,
        }))
    }

    /// Duplicate check against files uploaded earlier in this same run.
    fn run_duplicate(
        &self,
        candidate: &UploadCandidate,
        additions: &[RemoteEntry],
    ) -> Result<Option<(String, String)>, EngineError> {
        if self.config.force_new || additions.is_empty() {
            return Ok(None);
        }
        let label = candidate.label_path();
        if candidate.is_directory() {
            let prefix = format!("{label}/");
            let below = additions
                .iter()
                .find(|e| e.directory_label == label || e.directory_label.starts_with(&prefix));
            return Ok(below.map(|_| (label.clone(), label)));
        }
        if let Some(entry) = additions.iter().find(|e| e.label_path() == label) {
            return Ok(Some((entry.id.clone(), entry.label_path())));
        }
        if self.config.verify_checksums {
            let digest = candidate.checksum(self.config.algorithm)?;
            if let Some(entry) = additions
                .iter()
                .find(|e| e.checksum_value.as_deref() == Some(digest.as_str()))
            {
                return Ok(Some((entry.id.clone(), entry.label_path())));
            }
        }
        Ok(None)
    }

    /// Records an uploaded file so later candidates in this run can
    /// resolve against it.
    fn note_upload(
        &self,
        candidate: &UploadCandidate,
        outcome: &TransferOutcome,
        additions: &mut Vec<RemoteEntry>,
        uploaded_files: &mut usize,
    ) {
        let TransferOutcome::Uploaded { id, .. } = outcome else {
            return;
        };
        if candidate.is_directory() {
            return;
        }
        *uploaded_files += 1;
        additions.push(RemoteEntry {
            id: id.clone(),
            label: candidate.name().to_string(),
            directory_label: candidate.directory_label(),
            size: candidate.size(),
            checksum_type: Some(self.config.algorithm.server_name().to_string()),
            checksum_value: candidate.cached_checksum(self.config.algorithm),
        });
    }

    /// Routes one failed attempt: permanent errors are recorded, lock
    /// conflicts wait for the lock before re-queueing, transient errors
    /// re-queue directly.
    async fn dispatch_failure(
        &self,
        candidate: UploadCandidate,
        error: EngineError,
        deferred: &mut Vec<Deferred>,
    ) {
        let path = candidate.label_path();
        match error.classify() {
            FailureClass::Permanent => {
                self.finish(
                    &path,
                    TransferOutcome::Failed {
                        reason: error.to_string(),
                    },
                );
            }
            FailureClass::LockConflict => {
                let last_error = self.wait_for_lock(&path, &error).await;
                self.emit(UploadEvent::Outcome {
                    path: path.clone(),
                    outcome: TransferOutcome::DeferredRetry,
                    run_bytes: self.stats.snapshot().uploaded_bytes,
                });
                deferred.push(Deferred {
                    candidate,
                    last_error,
                });
            }
            FailureClass::Transient => {
                self.emit(UploadEvent::Outcome {
                    path: path.clone(),
                    outcome: TransferOutcome::DeferredRetry,
                    run_bytes: self.stats.snapshot().uploaded_bytes,
                });
                deferred.push(Deferred {
                    candidate,
                    last_error: error.to_string(),
                });
            }
        }
    }

    /// Waits for the dataset lock to clear after a conflict. Returns the
    /// failure reason to carry on the deferred candidate: the conflict
    /// itself when the lock cleared (or the wait was interrupted), a
    /// lock-timeout error when the bounded wait ran out.
    async fn wait_for_lock(&self, path: &str, conflict: &EngineError) -> String {
        self.emit(UploadEvent::WaitingForLock {
            path: path.to_string(),
        });
        match await_unlocked(
            self.repo.as_ref(),
            self.config.max_lock_wait,
            self.config.lock_poll_interval,
            &self.cancel,
        )
        .await
        {
            Ok(LockWait::Cleared) => {
                debug!(path = %path, "lock cleared");
                conflict.to_string()
            }
            Ok(LockWait::TimedOut) => {
                warn!(path = %path, "lock wait timed out, deferring");
                EngineError::LockTimeout {
                    waited: self.config.max_lock_wait,
                }
                .to_string()
            }
            Err(e) => {
                debug!(path = %path, error = %e, "lock wait interrupted");
                conflict.to_string()
            }
        }
    }

    /// Re-attempts deferred candidates in rounds with exponential backoff,
    /// refreshing the inventory first so server-side processed files turn
    /// into duplicates instead of re-uploads.
    async fn retry_rounds(
        &self,
        mut deferred: Vec<Deferred>,
        additions: &mut Vec<RemoteEntry>,
        uploaded_files: &mut usize,
    ) {
        let mut round = 1u32;
        while !deferred.is_empty()
            && !self.cancel.is_cancelled()
            && self.policy.allows_retry(round - 1)
        {
            let delay = self.policy.delay_for_attempt(round);
            for d in &deferred {
                self.emit(UploadEvent::RetryScheduled {
                    path: d.candidate.label_path(),
                    attempt: round,
                    delay,
                });
            }
            info!(round, pending = deferred.len(), ?delay, "retry round");
            if !self.sleep(delay).await {
                break;
            }
            if let Err(e) = self.refresh_inventory().await {
                warn!(error = %e, "inventory refresh failed, using previous snapshot");
            }
            let snapshot = self.inventory.current();

            let mut next = Vec::new();
            let mut first = true;
            for d in deferred {
                if self.cancel.is_cancelled() {
                    next.push(d);
                    continue;
                }
                if !first && !self.sleep(self.config.retry_pause).await {
                    next.push(d);
                    continue;
                }
                first = false;

                match self.attempt(&d.candidate, &snapshot, additions).await {
                    Ok(Some(outcome)) => {
                        self.note_upload(&d.candidate, &outcome, additions, uploaded_files);
                        self.finish(&d.candidate.label_path(), outcome);
                    }
                    Ok(None) => {}
                    Err(e) => match e.classify() {
                        FailureClass::Permanent => {
                            self.finish(
                                &d.candidate.label_path(),
                                TransferOutcome::Failed {
                                    reason: e.to_string(),
                                },
                            );
                        }
                        FailureClass::LockConflict => {
                            let last_error =
                                self.wait_for_lock(&d.candidate.label_path(), &e).await;
                            next.push(Deferred {
                                candidate: d.candidate,
                                last_error,
                            });
                        }
                        FailureClass::Transient => {
                            next.push(Deferred {
                                candidate: d.candidate,
                                last_error: e.to_string(),
                            });
                        }
                    },
                }
            }
            deferred = next;
            round += 1;
        }

        // Retry budget exhausted (or the run was cancelled mid-queue).
        for d in deferred {
            self.finish(
                &d.candidate.label_path(),
                TransferOutcome::Failed {
                    reason: d.last_error,
                },
            );
        }
    }

    async fn refresh_inventory(&self) -> Result<(), EngineError> {
        let entries = self.repo.list_entries().await?;
        self.inventory.replace(InventorySnapshot::build(entries));
        Ok(())
    }

    fn finish(&self, path: &str, outcome: TransferOutcome) {
        self.stats.record(path, &outcome);
        self.emit(UploadEvent::Outcome {
            path: path.to_string(),
            outcome,
            run_bytes: self.stats.snapshot().uploaded_bytes,
        });
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    /// Cancellable sleep; `false` means the run was cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
