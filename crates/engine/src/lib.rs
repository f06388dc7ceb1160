//! Transfer orchestration engine.
//!
//! Walks local trees into candidates, decides per candidate whether the
//! dataset already holds it (exact name, server-side extension conversion,
//! or checksum), drives the proxied or direct-to-storage upload protocol
//! for the rest, waits out dataset locks, and retries transient failures
//! with exponential backoff against a refreshed remote inventory.

mod config;
mod convert;
mod dataverse;
mod error;
mod inventory;
mod lock;
mod orchestrator;
mod progress;
mod repository;
mod resolver;
mod retry;
mod stats;

pub use config::RunConfig;
pub use convert::ConversionTable;
pub use dataverse::DataverseRepository;
pub use error::{EngineError, FailureClass};
pub use inventory::{InventorySnapshot, RemoteEntry, RemoteInventory};
pub use lock::{LockState, LockWait, await_unlocked};
pub use orchestrator::Uploader;
pub use progress::UploadEvent;
pub use repository::{BoxFuture, Repository, UploadReceipt};
pub use resolver::{DuplicateResolver, MatchKind, Resolution};
pub use retry::RetryPolicy;
pub use stats::{RunStats, RunSummary, TransferOutcome};
