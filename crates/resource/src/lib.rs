//! Local side of a bulk upload: candidate discovery and content checksums.
//!
//! A [`Walker`] enumerates files and directories under a set of root paths
//! into [`UploadCandidate`]s with `/`-normalized relative paths. Each
//! candidate can produce a streaming checksum, computed at most once per
//! algorithm per run.

mod candidate;
mod hash;
mod walk;

pub use candidate::{CandidateKind, UploadCandidate};
pub use hash::{ChecksumAlgorithm, HashSink, fingerprint_file};
pub use walk::{WalkError, Walker};

/// Errors produced by the resource crate.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),
}
