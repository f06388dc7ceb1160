use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::ResourceError;

/// Read buffer for streaming checksums. Files are never loaded whole.
const CHUNK_SIZE: usize = 64 * 1024;

/// Checksum algorithm used for duplicate detection and upload verification.
///
/// Selected once per run. The `Display` form matches the server's spelling
/// (`MD5`, `SHA-1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// The server-visible name of the algorithm.
    pub fn server_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Returns `true` if `name` refers to this algorithm (case-insensitive,
    /// dash optional).
    pub fn matches_name(&self, name: &str) -> bool {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match self {
            Self::Md5 => normalized == "md5",
            Self::Sha1 => normalized == "sha1",
            Self::Sha256 => normalized == "sha256",
            Self::Sha512 => normalized == "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.server_name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for alg in [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512] {
            if alg.matches_name(s) {
                return Ok(alg);
            }
        }
        Err(ResourceError::UnknownAlgorithm(s.to_string()))
    }
}

/// Computes the checksum of a file, streaming it in fixed-size chunks.
///
/// Returns the lowercase hex digest.
pub fn fingerprint_file(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, ResourceError> {
    let file = std::fs::File::open(path)?;
    match algorithm {
        ChecksumAlgorithm::Md5 => digest_reader::<Md5>(file),
        ChecksumAlgorithm::Sha1 => digest_reader::<Sha1>(file),
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256>(file),
        ChecksumAlgorithm::Sha512 => digest_reader::<Sha512>(file),
    }
}

fn digest_reader<D: Digest>(mut reader: impl Read) -> Result<String, ResourceError> {
    let mut hasher = D::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Incremental hasher for bytes that stream through on their way
/// somewhere else, so uploads need no second read pass.
pub struct HashSink(SinkInner);

enum SinkInner {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl HashSink {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self(match algorithm {
            ChecksumAlgorithm::Md5 => SinkInner::Md5(Md5::new()),
            ChecksumAlgorithm::Sha1 => SinkInner::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => SinkInner::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => SinkInner::Sha512(Sha512::new()),
        })
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.0 {
            SinkInner::Md5(h) => h.update(bytes),
            SinkInner::Sha1(h) => h.update(bytes),
            SinkInner::Sha256(h) => h.update(bytes),
            SinkInner::Sha512(h) => h.update(bytes),
        }
    }

    /// Consumes the sink and returns the lowercase hex digest.
    pub fn finalize(self) -> String {
        match self.0 {
            SinkInner::Md5(h) => hex::encode(h.finalize()),
            SinkInner::Sha1(h) => hex::encode(h.finalize()),
            SinkInner::Sha256(h) => hex::encode(h.finalize()),
            SinkInner::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}
