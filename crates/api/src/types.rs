//! Serde types for the Dataverse native API.
//!
//! Only the fields the engine consumes are modeled; everything else in the
//! server's responses is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Standard native-API response envelope: `{"status":"OK","data":...}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Minimal dataset metadata, used for the up-front reachability check.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    pub id: i64,
}

/// One entry of the dataset file listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedFile {
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "directoryLabel")]
    pub directory_label: String,
    #[serde(rename = "dataFile")]
    pub data_file: DataFile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataFile {
    pub id: i64,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub checksum: Option<Checksum>,
    #[serde(default, rename = "storageIdentifier")]
    pub storage_identifier: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// One active lock on the dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct LockInfo {
    #[serde(default, rename = "lockType")]
    pub lock_type: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "date")]
    pub since: Option<String>,
}

/// Pre-authorized storage locations for a direct upload.
///
/// Small files get a single `url`; larger ones get a `urls` map keyed by
/// part number (as a string) plus the server-dictated `part_size` and the
/// completion/abort endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTicket {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub urls: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "partSize")]
    pub part_size: Option<u64>,
    #[serde(rename = "storageIdentifier")]
    pub storage_identifier: String,
    #[serde(default)]
    pub complete: Option<String>,
    #[serde(default)]
    pub abort: Option<String>,
}

impl UploadTicket {
    /// Part URLs in ascending part-number order. Keys that are not part
    /// numbers are dropped with a warning; the driver's byte accounting
    /// rejects the ticket if that leaves it short.
    pub fn ordered_parts(&self) -> Vec<(u32, String)> {
        let mut parts: Vec<(u32, String)> = Vec::new();
        for (key, url) in self.urls.iter().flatten() {
            match key.parse::<u32>() {
                Ok(n) => parts.push((n, url.clone())),
                Err(_) => {
                    tracing::warn!(key = %key, "ignoring unparseable part number in upload ticket")
                }
            }
        }
        parts.sort_by_key(|(n, _)| *n);
        parts
    }
}

/// Registration payload for one directly-uploaded file.
#[derive(Debug, Clone, Serialize)]
pub struct FileRegistration {
    #[serde(rename = "storageIdentifier")]
    pub storage_identifier: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "directoryLabel", skip_serializing_if = "Option::is_none")]
    pub directory_label: Option<String>,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub checksum: RegistrationChecksum,
    pub restrict: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationChecksum {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@value")]
    pub value: String,
}

/// Response data for both proxied `add` and direct `addFiles` calls.
#[derive(Debug, Clone, Deserialize)]
pub struct AddFilesData {
    #[serde(default)]
    pub files: Vec<AddedFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddedFile {
    #[serde(rename = "dataFile")]
    pub data_file: DataFile,
}
