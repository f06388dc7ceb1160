use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::candidate::UploadCandidate;

/// A non-fatal error for one walked entry. The walk continues with the
/// entry's siblings.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("path does not exist: {path}")]
    Missing { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    Entry {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("symlink cycle at {path}")]
    Cycle { path: PathBuf },
}

impl WalkError {
    /// The local path the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            Self::Missing { path } | Self::Entry { path, .. } | Self::Cycle { path } => path,
        }
    }
}

struct Frame {
    path: PathBuf,
    segments: Vec<String>,
    is_root: bool,
}

/// Lazy depth-first enumeration of upload candidates under a set of roots.
///
/// Directories are yielded before their children when recursion is enabled;
/// with recursion disabled, directory roots are yielded but not expanded.
/// Root directories themselves are expanded without being yielded — their
/// contents land at the top of the dataset. Unreadable entries yield an
/// `Err` item and the walk continues. Enumeration order is whatever the
/// filesystem returns.
pub struct Walker {
    stack: Vec<Frame>,
    recurse: bool,
    visited_dirs: HashSet<PathBuf>,
}

impl Walker {
    pub fn new(roots: &[PathBuf], recurse: bool) -> Self {
        // Reversed so the stack pops roots in the given order.
        let stack = roots
            .iter()
            .rev()
            .map(|p| Frame {
                path: p.clone(),
                segments: Vec::new(),
                is_root: true,
            })
            .collect();
        Self {
            stack,
            recurse,
            visited_dirs: HashSet::new(),
        }
    }

    /// Reads a directory and pushes its children in enumeration order.
    /// Hidden entries (dot-files) are skipped.
    fn push_children(&mut self, frame: &Frame) -> Result<(), WalkError> {
        let entries = std::fs::read_dir(&frame.path).map_err(|source| WalkError::Entry {
            path: frame.path.clone(),
            source,
        })?;

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| WalkError::Entry {
                path: frame.path.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let mut segments = frame.segments.clone();
            segments.push(name);
            children.push(Frame {
                path: entry.path(),
                segments,
                is_root: false,
            });
        }
        // Reversed so the first child is popped first.
        self.stack.extend(children.into_iter().rev());
        Ok(())
    }

    /// Marks a directory as visited; returns `false` if it was seen before
    /// (a symlink cycle).
    fn enter_dir(&mut self, path: &Path) -> bool {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.visited_dirs.insert(canonical)
    }
}

impl Iterator for Walker {
    type Item = Result<UploadCandidate, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.pop()?;

            let metadata = match std::fs::metadata(&frame.path) {
                Ok(m) => m,
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                    return Some(Err(WalkError::Missing {
                        path: frame.path,
                    }));
                }
                Err(source) => {
                    return Some(Err(WalkError::Entry {
                        path: frame.path,
                        source,
                    }));
                }
            };

            if metadata.is_dir() {
                if frame.is_root {
                    if !self.recurse {
                        // Reported but not expanded.
                        let name = frame
                            .path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| frame.path.to_string_lossy().into_owned());
                        return Some(Ok(UploadCandidate::directory(frame.path, vec![name])));
                    }
                    // Root directories contribute their contents, not themselves.
                    if !self.enter_dir(&frame.path) {
                        return Some(Err(WalkError::Cycle { path: frame.path }));
                    }
                    if let Err(e) = self.push_children(&frame) {
                        return Some(Err(e));
                    }
                    continue;
                }

                if !self.recurse {
                    // Unreachable in practice: non-root frames only exist when
                    // recursing. Kept for safety.
                    continue;
                }
                if !self.enter_dir(&frame.path) {
                    warn!(path = %frame.path.display(), "skipping symlink cycle");
                    return Some(Err(WalkError::Cycle { path: frame.path }));
                }
                if let Err(e) = self.push_children(&frame) {
                    return Some(Err(e));
                }
                return Some(Ok(UploadCandidate::directory(frame.path, frame.segments)));
            }

            let segments = if frame.is_root {
                let name = frame
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| frame.path.to_string_lossy().into_owned());
                vec![name]
            } else {
                frame.segments
            };
            return Some(Ok(UploadCandidate::file(
                frame.path,
                segments,
                metadata.len(),
            )));
        }
    }
}
