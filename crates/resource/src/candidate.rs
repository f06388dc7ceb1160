use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::hash::{ChecksumAlgorithm, fingerprint_file};
use crate::ResourceError;

/// Whether a candidate is a regular file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CandidateKind {
    File,
    Directory,
}

/// One local file or directory discovered for possible transfer.
///
/// Immutable once created, apart from the checksum cache: a digest is
/// computed at most once per algorithm per run and reused for both
/// duplicate detection and post-upload verification.
pub struct UploadCandidate {
    segments: Vec<String>,
    source: PathBuf,
    size: u64,
    kind: CandidateKind,
    checksums: Mutex<HashMap<ChecksumAlgorithm, String>>,
}

impl UploadCandidate {
    /// Creates a file candidate.
    pub fn file(source: PathBuf, segments: Vec<String>, size: u64) -> Self {
        Self {
            segments,
            source,
            size,
            kind: CandidateKind::File,
            checksums: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a directory candidate.
    pub fn directory(source: PathBuf, segments: Vec<String>) -> Self {
        Self {
            segments,
            source,
            size: 0,
            kind: CandidateKind::Directory,
            checksums: Mutex::new(HashMap::new()),
        }
    }

    /// The file or directory name (last path segment).
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The relative path within the upload, joined with `/`.
    pub fn label_path(&self) -> String {
        self.segments.join("/")
    }

    /// The parent directory path within the upload (empty at the top level).
    pub fn directory_label(&self) -> String {
        if self.segments.len() <= 1 {
            String::new()
        } else {
            self.segments[..self.segments.len() - 1].join("/")
        }
    }

    /// The absolute source location on the local filesystem.
    pub fn source_path(&self) -> &Path {
        &self.source
    }

    /// Size in bytes (0 for directories).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == CandidateKind::Directory
    }

    /// Returns the checksum for `algorithm`, computing and caching it on
    /// first use. Directories are never checksummed.
    pub fn checksum(&self, algorithm: ChecksumAlgorithm) -> Result<String, ResourceError> {
        debug_assert!(!self.is_directory());
        if let Some(cached) = self.cached_checksum(algorithm) {
            return Ok(cached);
        }
        let digest = fingerprint_file(&self.source, algorithm)?;
        self.store_checksum(algorithm, digest.clone());
        Ok(digest)
    }

    /// Returns the cached digest without computing one.
    pub fn cached_checksum(&self, algorithm: ChecksumAlgorithm) -> Option<String> {
        self.checksums
            .lock()
            .ok()
            .and_then(|map| map.get(&algorithm).cloned())
    }

    /// Caches a digest computed elsewhere (e.g. while streaming an upload).
    pub fn store_checksum(&self, algorithm: ChecksumAlgorithm, digest: String) {
        if let Ok(mut map) = self.checksums.lock() {
            map.entry(algorithm).or_insert(digest);
        }
    }
}

impl std::fmt::Debug for UploadCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCandidate")
            .field("path", &self.label_path())
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn label_paths() {
        let c = UploadCandidate::file(
            PathBuf::from("/data/sub/file.csv"),
            vec!["sub".into(), "file.csv".into()],
            10,
        );
        assert_eq!(c.name(), "file.csv");
        assert_eq!(c.label_path(), "sub/file.csv");
        assert_eq!(c.directory_label(), "sub");
    }

    #[test]
    fn top_level_file_has_empty_directory_label() {
        let c = UploadCandidate::file(PathBuf::from("/data/a.txt"), vec!["a.txt".into()], 1);
        assert_eq!(c.directory_label(), "");
        assert_eq!(c.label_path(), "a.txt");
    }

    #[test]
    fn checksum_is_computed_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        fs::write(&path, b"cache me").unwrap();

        let c = UploadCandidate::file(path.clone(), vec!["f.bin".into()], 8);
        assert!(c.cached_checksum(ChecksumAlgorithm::Md5).is_none());

        let first = c.checksum(ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(c.cached_checksum(ChecksumAlgorithm::Md5).unwrap(), first);

        // Deleting the file proves the second call reads from the cache.
        fs::remove_file(&path).unwrap();
        assert_eq!(c.checksum(ChecksumAlgorithm::Md5).unwrap(), first);
    }

    #[test]
    fn store_checksum_does_not_overwrite() {
        let c = UploadCandidate::file(PathBuf::from("/x"), vec!["x".into()], 0);
        c.store_checksum(ChecksumAlgorithm::Sha256, "aaaa".into());
        c.store_checksum(ChecksumAlgorithm::Sha256, "bbbb".into());
        assert_eq!(
            c.cached_checksum(ChecksumAlgorithm::Sha256).unwrap(),
            "aaaa"
        );
    }

    #[test]
    fn unreadable_file_surfaces_io_error() {
        let c = UploadCandidate::file(PathBuf::from("/nonexistent/y"), vec!["y".into()], 0);
        assert!(matches!(
            c.checksum(ChecksumAlgorithm::Sha256),
            Err(ResourceError::Io(_))
        ));
    }
}
