use dvbulk_resource::{ChecksumAlgorithm, UploadCandidate};
use tracing::debug;

use crate::convert::ConversionTable;
use crate::error::EngineError;
use crate::inventory::InventorySnapshot;

/// What a duplicate match was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Same label in the same directory.
    ExactLabel,
    /// Label matched after applying an extension conversion rule.
    ConvertedLabel,
    /// Identical content under any name.
    Checksum,
    /// Some remote entry already lives at or below this directory path.
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Duplicate {
        existing_id: String,
        matched_label: String,
        kind: MatchKind,
    },
    NeedsUpload,
}

/// Decides per candidate whether the dataset already holds it.
///
/// Decision order, first match wins: exact label, label after
/// server-side extension conversion, then content checksum. The checksum
/// check is last because it is the only one that may force a read of the
/// whole file.
pub struct DuplicateResolver {
    conversions: ConversionTable,
    algorithm: ChecksumAlgorithm,
    verify_checksums: bool,
    force_new: bool,
}

impl DuplicateResolver {
    pub fn new(
        conversions: ConversionTable,
        algorithm: ChecksumAlgorithm,
        verify_checksums: bool,
        force_new: bool,
    ) -> Self {
        Self {
            conversions,
            algorithm,
            verify_checksums,
            force_new,
        }
    }

    pub fn resolve(
        &self,
        candidate: &UploadCandidate,
        snapshot: &InventorySnapshot,
    ) -> Result<Resolution, EngineError> {
        if self.force_new {
            return Ok(Resolution::NeedsUpload);
        }
        if candidate.is_directory() {
            return Ok(self.resolve_directory(candidate, snapshot));
        }

        let label_path = candidate.label_path();
        if let Some(entry) = snapshot.lookup_label(&label_path) {
            debug!(path = %label_path, id = %entry.id, "exact label match");
            return Ok(Resolution::Duplicate {
                existing_id: entry.id.clone(),
                matched_label: entry.label_path(),
                kind: MatchKind::ExactLabel,
            });
        }

        if let Some(converted) = self.conversions.converted_label(&label_path) {
            if let Some(entry) = snapshot.lookup_label(&converted) {
                debug!(path = %label_path, converted = %converted, "converted label match");
                return Ok(Resolution::Duplicate {
                    existing_id: entry.id.clone(),
                    matched_label: entry.label_path(),
                    kind: MatchKind::ConvertedLabel,
                });
            }
        }

        if self.verify_checksums {
            let digest = candidate.checksum(self.algorithm)?;
            if let Some(entry) = snapshot.lookup_checksum(&digest) {
                debug!(path = %label_path, matched = %entry.label_path(), "checksum match");
                return Ok(Resolution::Duplicate {
                    existing_id: entry.id.clone(),
                    matched_label: entry.label_path(),
                    kind: MatchKind::Checksum,
                });
            }
        }

        Ok(Resolution::NeedsUpload)
    }

    fn resolve_directory(
        &self,
        candidate: &UploadCandidate,
        snapshot: &InventorySnapshot,
    ) -> Resolution {
        let path = candidate.label_path();
        if snapshot.has_directory(&path) {
            Resolution::Duplicate {
                existing_id: path.clone(),
                matched_label: path,
                kind: MatchKind::Directory,
            }
        } else {
            Resolution::NeedsUpload
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::RemoteEntry;
    use std::io::Write;

    fn resolver(verify: bool) -> DuplicateResolver {
        DuplicateResolver::new(
            ConversionTable::default(),
            ChecksumAlgorithm::Md5,
            verify,
            false,
        )
    }

    fn remote(id: &str, dir: &str, label: &str, digest: Option<&str>) -> RemoteEntry {
        RemoteEntry {
            id: id.into(),
            label: label.into(),
            directory_label: dir.into(),
            size: 11,
            checksum_type: digest.map(|_| "MD5".to_string()),
            checksum_value: digest.map(str::to_string),
        }
    }

    fn file_candidate(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> UploadCandidate {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        UploadCandidate::file(path, vec![name.to_string()], content.len() as u64)
    }

    #[test]
    fn exact_label_wins() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = file_candidate(&dir, "a.txt", b"hello world");
        let snap = InventorySnapshot::build(vec![remote("7", "", "a.txt", None)]);

        let res = resolver(false).resolve(&candidate, &snap).unwrap();
        assert_eq!(
            res,
            Resolution::Duplicate {
                existing_id: "7".into(),
                matched_label: "a.txt".into(),
                kind: MatchKind::ExactLabel,
            }
        );
    }

    #[test]
    fn conversion_rule_matches_renamed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = file_candidate(&dir, "survey.csv", b"a,b\n1,2\n");
        let snap = InventorySnapshot::build(vec![remote("3", "", "survey.tab", None)]);

        let res = resolver(false).resolve(&candidate, &snap).unwrap();
        assert_eq!(
            res,
            Resolution::Duplicate {
                existing_id: "3".into(),
                matched_label: "survey.tab".into(),
                kind: MatchKind::ConvertedLabel,
            }
        );
    }

    #[test]
    fn checksum_match_requires_verification_flag() {
        let dir = tempfile::tempdir().unwrap();
        // MD5("hello world")
        let digest = "5eb63bbbe01eeed093cb22bb8f5acdc3";
        let candidate = file_candidate(&dir, "renamed.bin", b"hello world");
        let snap = InventorySnapshot::build(vec![remote("9", "", "orig.bin", Some(digest))]);

        assert_eq!(
            resolver(false).resolve(&candidate, &snap).unwrap(),
            Resolution::NeedsUpload
        );
        assert_eq!(
            resolver(true).resolve(&candidate, &snap).unwrap(),
            Resolution::Duplicate {
                existing_id: "9".into(),
                matched_label: "orig.bin".into(),
                kind: MatchKind::Checksum,
            }
        );
    }

    #[test]
    fn exact_label_takes_precedence_over_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = file_candidate(&dir, "a.txt", b"hello world");
        let snap = InventorySnapshot::build(vec![
            remote("1", "", "a.txt", None),
            remote("2", "", "copy.txt", Some("5eb63bbbe01eeed093cb22bb8f5acdc3")),
        ]);

        let res = resolver(true).resolve(&candidate, &snap).unwrap();
        assert!(matches!(
            res,
            Resolution::Duplicate {
                kind: MatchKind::ExactLabel,
                ..
            }
        ));
    }

    #[test]
    fn force_new_bypasses_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = file_candidate(&dir, "a.txt", b"x");
        let snap = InventorySnapshot::build(vec![remote("1", "", "a.txt", None)]);

        let r = DuplicateResolver::new(
            ConversionTable::default(),
            ChecksumAlgorithm::Md5,
            true,
            true,
        );
        assert_eq!(r.resolve(&candidate, &snap).unwrap(), Resolution::NeedsUpload);
    }

    #[test]
    fn directories_match_when_inventory_has_entries_below() {
        let candidate =
            UploadCandidate::directory(std::path::PathBuf::from("/tmp/raw"), vec!["raw".into()]);
        let populated = InventorySnapshot::build(vec![remote("1", "raw/2020", "f.txt", None)]);
        let empty = InventorySnapshot::build(vec![]);

        assert!(matches!(
            resolver(false).resolve(&candidate, &populated).unwrap(),
            Resolution::Duplicate {
                kind: MatchKind::Directory,
                ..
            }
        ));
        assert_eq!(
            resolver(false).resolve(&candidate, &empty).unwrap(),
            Resolution::NeedsUpload
        );
    }
}
