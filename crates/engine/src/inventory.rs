use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use dvbulk_api::types::ListedFile;

/// One object already present in the target dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Persistent file identifier.
    pub id: String,
    /// Server-visible file name (possibly a converted extension).
    pub label: String,
    /// Directory path within the dataset (empty at the top level).
    pub directory_label: String,
    pub size: u64,
    pub checksum_type: Option<String>,
    /// Lowercase hex digest.
    pub checksum_value: Option<String>,
}

impl RemoteEntry {
    /// Full label path (`directory/label`).
    pub fn label_path(&self) -> String {
        if self.directory_label.is_empty() {
            self.label.clone()
        } else {
            format!("{}/{}", self.directory_label, self.label)
        }
    }
}

impl From<ListedFile> for RemoteEntry {
    fn from(f: ListedFile) -> Self {
        let (checksum_type, checksum_value) = match f.data_file.checksum {
            Some(c) => (Some(c.kind), Some(c.value.to_ascii_lowercase())),
            None => (None, None),
        };
        Self {
            id: f.data_file.id.to_string(),
            label: f.label,
            directory_label: f.directory_label,
            size: f.data_file.filesize,
            checksum_type,
            checksum_value,
        }
    }
}

/// Immutable view of the dataset contents, built from one listing call.
#[derive(Debug, Default)]
pub struct InventorySnapshot {
    by_label: HashMap<String, RemoteEntry>,
    by_checksum: HashMap<String, RemoteEntry>,
    directories: HashSet<String>,
}

impl InventorySnapshot {
    pub fn build(entries: Vec<RemoteEntry>) -> Self {
        let mut by_label = HashMap::new();
        let mut by_checksum = HashMap::new();
        let mut directories = HashSet::new();

        for entry in entries {
            // Every ancestor of the entry's directory counts as existing.
            let mut prefix = String::new();
            for segment in entry
                .directory_label
                .split('/')
                .filter(|s| !s.is_empty())
            {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(segment);
                directories.insert(prefix.clone());
            }

            if let Some(digest) = &entry.checksum_value {
                by_checksum.insert(digest.clone(), entry.clone());
            }
            by_label.insert(entry.label_path(), entry);
        }

        Self {
            by_label,
            by_checksum,
            directories,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn lookup_label(&self, label_path: &str) -> Option<&RemoteEntry> {
        self.by_label.get(label_path)
    }

    /// Looks up an entry by lowercase hex digest, regardless of which file
    /// name it is stored under.
    pub fn lookup_checksum(&self, digest: &str) -> Option<&RemoteEntry> {
        self.by_checksum.get(&digest.to_ascii_lowercase())
    }

    /// `true` when some remote entry lives at or below `directory`.
    pub fn has_directory(&self, directory: &str) -> bool {
        self.directories.contains(directory)
    }
}

/// Shared, refreshable handle to the current snapshot.
///
/// A refresh replaces the snapshot atomically: concurrent readers see
/// either the old or the new one, never a partial state.
#[derive(Default)]
pub struct RemoteInventory {
    current: RwLock<Arc<InventorySnapshot>>,
}

impl RemoteInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<InventorySnapshot> {
        match self.current.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, snapshot: InventorySnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut g) => *g = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, dir: &str, label: &str, digest: Option<&str>) -> RemoteEntry {
        RemoteEntry {
            id: id.into(),
            label: label.into(),
            directory_label: dir.into(),
            size: 1,
            checksum_type: digest.map(|_| "MD5".to_string()),
            checksum_value: digest.map(|d| d.to_ascii_lowercase()),
        }
    }

    #[test]
    fn label_paths_join_directory_and_name() {
        assert_eq!(entry("1", "", "a.txt", None).label_path(), "a.txt");
        assert_eq!(
            entry("1", "raw/2020", "a.txt", None).label_path(),
            "raw/2020/a.txt"
        );
    }

    #[test]
    fn snapshot_indexes_labels_and_checksums() {
        let snap = InventorySnapshot::build(vec![
            entry("1", "", "a.txt", Some("AABB")),
            entry("2", "sub", "b.tab", None),
        ]);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.lookup_label("a.txt").unwrap().id, "1");
        assert_eq!(snap.lookup_label("sub/b.tab").unwrap().id, "2");
        assert!(snap.lookup_label("b.tab").is_none());
        // Checksum lookup is case-insensitive via lowercase normalization.
        assert_eq!(snap.lookup_checksum("aabb").unwrap().id, "1");
        assert_eq!(snap.lookup_checksum("AABB").unwrap().id, "1");
    }

    #[test]
    fn ancestor_directories_exist() {
        let snap = InventorySnapshot::build(vec![entry("1", "a/b/c", "f.txt", None)]);
        assert!(snap.has_directory("a"));
        assert!(snap.has_directory("a/b"));
        assert!(snap.has_directory("a/b/c"));
        assert!(!snap.has_directory("b"));
        assert!(!snap.has_directory("a/b/c/f.txt"));
    }

    #[test]
    fn replace_swaps_snapshot_atomically() {
        let inv = RemoteInventory::new();
        assert!(inv.current().is_empty());

        let old = inv.current();
        inv.replace(InventorySnapshot::build(vec![entry("1", "", "a", None)]));

        // The old handle still sees the old snapshot; new reads see the
        // replacement.
        assert!(old.is_empty());
        assert_eq!(inv.current().len(), 1);
    }

    #[test]
    fn from_listed_file_lowercases_digest() {
        let json = r#"{
            "label": "x.tab", "directoryLabel": "d",
            "dataFile": {"id": 5, "filesize": 3,
                         "checksum": {"type": "MD5", "value": "ABCDEF"}}
        }"#;
        let listed: ListedFile = serde_json::from_str(json).unwrap();
        let entry = RemoteEntry::from(listed);
        assert_eq!(entry.id, "5");
        assert_eq!(entry.checksum_value.as_deref(), Some("abcdef"));
    }
}
