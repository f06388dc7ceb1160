use std::future::Future;
use std::pin::Pin;

use dvbulk_resource::UploadCandidate;

use crate::error::EngineError;
use crate::inventory::RemoteEntry;
use crate::lock::LockState;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Proof that a file landed in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Persistent identifier assigned by the repository.
    pub id: String,
    /// Bytes actually sent.
    pub bytes: u64,
}

/// The repository-specific operations the orchestrator is parameterized
/// over. Object-safe so the orchestrator can hold `Arc<dyn Repository>`
/// and tests can inject mocks.
pub trait Repository: Send + Sync {
    /// Up-front validation that the target dataset exists and the
    /// credential works. A failure here aborts the run before any
    /// transfer starts.
    fn dataset_check(&self) -> BoxFuture<'_, Result<(), EngineError>>;

    /// One authoritative listing of the dataset contents.
    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<RemoteEntry>, EngineError>>;

    /// Current lock status. Polled, never cached.
    fn lock_state(&self) -> BoxFuture<'_, Result<LockState, EngineError>>;

    /// Makes sure a directory path exists. Idempotent; returns the
    /// path's identifier.
    fn ensure_directory<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<String, EngineError>>;

    /// Transfers one file and registers it in the dataset catalog.
    fn upload_file<'a>(
        &'a self,
        candidate: &'a UploadCandidate,
    ) -> BoxFuture<'a, Result<UploadReceipt, EngineError>>;
}
