//! Dataverse-backed [`Repository`] implementation: protocol selection,
//! proxied and direct-to-storage uploads, and catalog registration.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dvbulk_api::types::{AddedFile, FileRegistration, LockInfo, RegistrationChecksum, UploadTicket};
use dvbulk_api::{ApiClient, ApiClientConfig, ApiError, ChunkObserver};
use dvbulk_resource::{ChecksumAlgorithm, HashSink, ResourceError, UploadCandidate};
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::EngineError;
use crate::inventory::RemoteEntry;
use crate::lock::LockState;
use crate::repository::{BoxFuture, Repository, UploadReceipt};

const OCTET_STREAM: &str = "application/octet-stream";

/// Talks to one Dataverse server and dataset.
///
/// Prefers direct-to-storage upload when configured; a 404 from the
/// ticket endpoint means the store does not support it, and every later
/// file goes through the proxied path without re-probing.
pub struct DataverseRepository {
    client: Arc<ApiClient>,
    algorithm: ChecksumAlgorithm,
    direct_upload: bool,
    part_concurrency: usize,
    direct_unsupported: AtomicBool,
}

impl DataverseRepository {
    pub fn new(config: &RunConfig) -> Result<Self, EngineError> {
        let client = ApiClient::new(&ApiClientConfig {
            base_url: config.server_url.clone(),
            api_key: config.api_key.clone(),
            dataset_pid: config.dataset_pid.clone(),
            request_timeout: config.request_timeout,
            concurrency: config.http_concurrency,
        })?;
        Ok(Self {
            client: Arc::new(client),
            algorithm: config.algorithm,
            direct_upload: config.direct_upload,
            part_concurrency: config.part_concurrency.max(1),
            direct_unsupported: AtomicBool::new(false),
        })
    }

    async fn transfer(&self, candidate: &UploadCandidate) -> Result<UploadReceipt, EngineError> {
        if self.direct_upload && !self.direct_unsupported.load(Ordering::Relaxed) {
            match self.client.request_upload_urls(candidate.size()).await {
                Ok(ticket) => return self.direct(candidate, ticket).await,
                Err(e) if e.is_unsupported() => {
                    info!("store does not support direct upload, using proxied transfers");
                    self.direct_unsupported.store(true, Ordering::Relaxed);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.proxied(candidate).await
    }

    /// One streamed multipart POST through the API server.
    async fn proxied(&self, candidate: &UploadCandidate) -> Result<UploadReceipt, EngineError> {
        let (observer, sink) = streaming_sink(self.algorithm);
        let directory = candidate.directory_label();
        let added = self
            .client
            .add_file_proxied(
                candidate.source_path(),
                candidate.name(),
                (!directory.is_empty()).then_some(directory.as_str()),
                candidate.size(),
                Some(observer),
            )
            .await?;

        let digest = finish_sink(sink)?;
        candidate.store_checksum(self.algorithm, digest.clone());

        let file = added
            .files
            .first()
            .ok_or_else(|| ApiError::Protocol("add response listed no files".into()))?;
        verify_registered(candidate, self.algorithm, &digest, file)?;
        Ok(UploadReceipt {
            id: file.data_file.id.to_string(),
            bytes: candidate.size(),
        })
    }

    /// Direct-to-storage upload: single PUT or concurrent part PUTs,
    /// then completion and catalog registration.
    async fn direct(
        &self,
        candidate: &UploadCandidate,
        ticket: UploadTicket,
    ) -> Result<UploadReceipt, EngineError> {
        let digest = if let Some(url) = &ticket.url {
            let (observer, sink) = streaming_sink(self.algorithm);
            self.client
                .put_file(url, candidate.source_path(), candidate.size(), Some(observer))
                .await?;
            finish_sink(sink)?
        } else {
            let result = self.upload_parts(candidate, &ticket).await;
            match result {
                Ok(digest) => digest,
                Err(e) => {
                    if let Some(abort) = &ticket.abort {
                        if let Err(abort_err) = self.client.abort_multipart(abort).await {
                            warn!(error = %abort_err, "failed to abort multipart upload");
                        }
                    }
                    return Err(e);
                }
            }
        };
        candidate.store_checksum(self.algorithm, digest.clone());

        let registration = FileRegistration {
            storage_identifier: ticket.storage_identifier.clone(),
            file_name: candidate.name().to_string(),
            directory_label: {
                let dir = candidate.directory_label();
                (!dir.is_empty()).then_some(dir)
            },
            mime_type: OCTET_STREAM.to_string(),
            checksum: RegistrationChecksum {
                kind: self.algorithm.server_name().to_string(),
                value: digest.clone(),
            },
            restrict: false,
        };
        let added = self.client.register_files(&[registration]).await?;
        let file = added
            .files
            .first()
            .ok_or_else(|| ApiError::Protocol("registration listed no files".into()))?;
        verify_registered(candidate, self.algorithm, &digest, file)?;
        Ok(UploadReceipt {
            id: file.data_file.id.to_string(),
            bytes: candidate.size(),
        })
    }

    /// Uploads the file as N parts with bounded concurrency. Parts are
    /// read sequentially so the digest is computed in one pass; the PUTs
    /// themselves run out of order. Returns the content digest once the
    /// completion call has been accepted.
    async fn upload_parts(
        &self,
        candidate: &UploadCandidate,
        ticket: &UploadTicket,
    ) -> Result<String, EngineError> {
        let part_size = ticket
            .part_size
            .ok_or_else(|| ApiError::Protocol("multipart ticket without part size".into()))?;
        let complete = ticket
            .complete
            .as_ref()
            .ok_or_else(|| ApiError::Protocol("multipart ticket without completion URL".into()))?;

        let mut file = tokio::fs::File::open(candidate.source_path())
            .await
            .map_err(ResourceError::from)?;
        let mut hasher = HashSink::new(self.algorithm);
        let mut remaining = candidate.size();
        let mut tasks: JoinSet<Result<(u32, String), ApiError>> = JoinSet::new();
        let mut etags: BTreeMap<u32, String> = BTreeMap::new();

        debug!(
            path = %candidate.label_path(),
            parts = ticket.ordered_parts().len(),
            part_size,
            "multipart upload"
        );

        for (number, url) in ticket.ordered_parts() {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(part_size) as usize;
            let mut buf = vec![0u8; take];
            file.read_exact(&mut buf).await.map_err(ResourceError::from)?;
            hasher.update(&buf);
            remaining -= take as u64;

            while tasks.len() >= self.part_concurrency {
                collect_part(&mut tasks, &mut etags).await?;
            }
            let client = Arc::clone(&self.client);
            tasks.spawn(async move {
                let etag = client.put_part(&url, buf).await?;
                Ok((number, etag))
            });
        }
        while !tasks.is_empty() {
            collect_part(&mut tasks, &mut etags).await?;
        }

        // A ticket with too few (or unparseable) part URLs would otherwise
        // store a truncated object whose checksum still matches the bytes
        // sent. Refuse to complete it.
        if remaining != 0 {
            return Err(ApiError::Protocol(format!(
                "upload ticket covers {} of {} bytes",
                candidate.size() - remaining,
                candidate.size()
            ))
            .into());
        }

        self.client.complete_multipart(complete, &etags).await?;
        Ok(hasher.finalize())
    }
}

impl Repository for DataverseRepository {
    fn dataset_check(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async {
            let info = self.client.dataset_metadata().await?;
            debug!(dataset_id = info.id, "dataset reachable");
            Ok(())
        })
    }

    fn list_entries(&self) -> BoxFuture<'_, Result<Vec<RemoteEntry>, EngineError>> {
        Box::pin(async {
            let files = self.client.list_files().await?;
            Ok(files.into_iter().map(RemoteEntry::from).collect())
        })
    }

    fn lock_state(&self) -> BoxFuture<'_, Result<LockState, EngineError>> {
        Box::pin(async {
            let locks = self.client.locks().await?;
            Ok(lock_state_of(&locks))
        })
    }

    /// Dataverse materializes directories from each file's
    /// `directoryLabel`, so there is nothing to create up front.
    fn ensure_directory<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move { Ok(path.to_string()) })
    }

    fn upload_file<'a>(
        &'a self,
        candidate: &'a UploadCandidate,
    ) -> BoxFuture<'a, Result<UploadReceipt, EngineError>> {
        Box::pin(self.transfer(candidate))
    }
}

fn lock_state_of(locks: &[LockInfo]) -> LockState {
    if locks.is_empty() {
        LockState::Unlocked
    } else {
        LockState::Locked {
            reasons: locks.iter().map(|l| l.lock_type.clone()).collect(),
        }
    }
}

/// Builds a chunk observer that feeds a shared [`HashSink`].
fn streaming_sink(algorithm: ChecksumAlgorithm) -> (ChunkObserver, Arc<Mutex<Option<HashSink>>>) {
    let sink = Arc::new(Mutex::new(Some(HashSink::new(algorithm))));
    let shared = Arc::clone(&sink);
    let observer: ChunkObserver = Arc::new(move |bytes: &[u8]| {
        if let Ok(mut guard) = shared.lock() {
            if let Some(sink) = guard.as_mut() {
                sink.update(bytes);
            }
        }
    });
    (observer, sink)
}

fn finish_sink(sink: Arc<Mutex<Option<HashSink>>>) -> Result<String, EngineError> {
    sink.lock()
        .ok()
        .and_then(|mut guard| guard.take())
        .map(HashSink::finalize)
        .ok_or_else(|| ApiError::Protocol("checksum sink unavailable".into()).into())
}

async fn collect_part(
    tasks: &mut JoinSet<Result<(u32, String), ApiError>>,
    etags: &mut BTreeMap<u32, String>,
) -> Result<(), EngineError> {
    if let Some(joined) = tasks.join_next().await {
        let (number, etag) =
            joined.map_err(|e| ApiError::Protocol(format!("part upload task failed: {e}")))??;
        etags.insert(number, etag);
    }
    Ok(())
}

/// The catalog entry's checksum must match what was hashed locally while
/// streaming; a mismatch means the stored bytes are not ours.
fn verify_registered(
    candidate: &UploadCandidate,
    algorithm: ChecksumAlgorithm,
    local_digest: &str,
    file: &AddedFile,
) -> Result<(), EngineError> {
    if let Some(remote) = &file.data_file.checksum {
        if algorithm.matches_name(&remote.kind)
            && !remote.value.eq_ignore_ascii_case(local_digest)
        {
            return Err(EngineError::ChecksumMismatch {
                path: candidate.source_path().to_path_buf(),
                local: local_digest.to_string(),
                remote: remote.value.to_ascii_lowercase(),
            });
        }
    }
    Ok(())
}
