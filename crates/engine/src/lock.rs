use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::repository::Repository;

/// Lock status of the target dataset at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked {
        /// Lock type names as reported by the server (e.g. `Ingest`).
        reasons: Vec<String>,
    },
}

/// Result of a bounded wait for the dataset to unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    Cleared,
    TimedOut,
}

/// Polls the lock state until it clears, up to `max_wait`. Each poll is
/// separated by a `poll_interval` sleep; cancellation interrupts the
/// sleep immediately.
pub async fn await_unlocked(
    repo: &dyn Repository,
    max_wait: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<LockWait, EngineError> {
    let started = Instant::now();
    loop {
        match repo.lock_state().await? {
            LockState::Unlocked => {
                debug!(waited_ms = started.elapsed().as_millis() as u64, "dataset unlocked");
                return Ok(LockWait::Cleared);
            }
            LockState::Locked { reasons } => {
                info!(?reasons, "dataset locked, waiting");
            }
        }

        if started.elapsed() + poll_interval > max_wait {
            return Ok(LockWait::TimedOut);
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dvbulk_resource::UploadCandidate;

    use crate::inventory::RemoteEntry;
    use crate::repository::{BoxFuture, UploadReceipt};

    /// Serves a scripted sequence of lock states, repeating the last one.
    struct ScriptedLocks {
        states: Mutex<Vec<LockState>>,
        polls: AtomicUsize,
    }

    impl ScriptedLocks {
        fn new(mut states: Vec<LockState>) -> Self {
            states.reverse();
            Self {
                states: Mutex::new(states),
                polls: AtomicUsize::new(0),
            }
        }
    }

    impl Repository for ScriptedLocks {
        fn dataset_check(&self) -> BoxFuture<'_, Result<(), EngineError>> {
            Box::pin(async { Ok(()) })
        }

        fn list_entries(&self) -> BoxFuture<'_, Result<Vec<RemoteEntry>, EngineError>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn lock_state(&self) -> BoxFuture<'_, Result<LockState, EngineError>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 {
                states.pop().unwrap()
            } else {
                states.last().cloned().unwrap()
            };
            Box::pin(async move { Ok(state) })
        }

        fn ensure_directory<'a>(
            &'a self,
            path: &'a str,
        ) -> BoxFuture<'a, Result<String, EngineError>> {
            let path = path.to_string();
            Box::pin(async move { Ok(path) })
        }

        fn upload_file<'a>(
            &'a self,
            _candidate: &'a UploadCandidate,
        ) -> BoxFuture<'a, Result<UploadReceipt, EngineError>> {
            Box::pin(async {
                Ok(UploadReceipt {
                    id: "0".into(),
                    bytes: 0,
                })
            })
        }
    }

    fn locked(reason: &str) -> LockState {
        LockState::Locked {
            reasons: vec![reason.into()],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clears_after_a_few_polls() {
        let repo = ScriptedLocks::new(vec![
            locked("Ingest"),
            locked("Ingest"),
            LockState::Unlocked,
        ]);
        let cancel = CancellationToken::new();

        let result = await_unlocked(
            &repo,
            Duration::from_secs(30),
            Duration::from_secs(3),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(result, LockWait::Cleared);
        assert_eq!(repo.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_lock_never_clears() {
        let repo = ScriptedLocks::new(vec![locked("Workflow")]);
        let cancel = CancellationToken::new();

        let result = await_unlocked(
            &repo,
            Duration::from_secs(10),
            Duration::from_secs(3),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(result, LockWait::TimedOut);
        // Polls at t=0, 3, 6, 9; the next sleep would pass max_wait.
        assert_eq!(repo.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn already_unlocked_returns_without_sleeping() {
        let repo = ScriptedLocks::new(vec![LockState::Unlocked]);
        let cancel = CancellationToken::new();

        let result = await_unlocked(
            &repo,
            Duration::from_secs(30),
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(result, LockWait::Cleared);
        assert_eq!(repo.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let repo = ScriptedLocks::new(vec![locked("Ingest")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = await_unlocked(
            &repo,
            Duration::from_secs(30),
            Duration::from_secs(5),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
