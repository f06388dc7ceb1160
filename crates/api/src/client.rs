//! Dataverse native API client.
//!
//! One shared `reqwest::Client` (connection pool) serves every request in a
//! run. The dataset API key travels in the `X-Dataverse-key` header on API
//! calls only — pre-authorized storage URLs are used as handed out.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::ETAG;
use tracing::debug;

use crate::error::ApiError;
use crate::types::{
    AddFilesData, DatasetInfo, Envelope, FileRegistration, ListedFile, LockInfo, UploadTicket,
};

const API_KEY_HEADER: &str = "X-Dataverse-key";
const USER_AGENT: &str = concat!("dvbulk/", env!("CARGO_PKG_VERSION"));

/// Called with each chunk of an upload body as it streams out. Used to
/// compute checksums without a second read pass.
pub type ChunkObserver = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub dataset_pid: String,
    pub request_timeout: Duration,
    pub concurrency: usize,
}

/// Client for one Dataverse server and target dataset.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    pid_query: String,
}

impl ApiClient {
    pub fn new(config: &ApiClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.concurrency)
            .build()?;

        let pid_query =
            utf8_percent_encode(&config.dataset_pid, NON_ALPHANUMERIC).to_string();

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            pid_query,
        })
    }

    fn dataset_url(&self, suffix: &str) -> String {
        format!(
            "{}/api/datasets/:persistentId{}persistentId={}",
            self.base_url,
            if suffix.contains('?') {
                format!("{suffix}&")
            } else {
                format!("{suffix}?")
            },
            self.pid_query
        )
    }

    /// Resolves server-relative URLs (Dataverse hands these out for
    /// multipart completion and abort).
    fn absolute(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            url.to_string()
        }
    }

    fn api_get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).header(API_KEY_HEADER, &self.api_key)
    }

    fn api_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.post(url).header(API_KEY_HEADER, &self.api_key)
    }

    /// Performs a GET against the native API and unwraps the envelope.
    async fn get_data<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let resp = self.api_get(url).send().await?;
        let resp = check_status(resp).await?;
        let env: Envelope<T> = resp.json().await?;
        unwrap_envelope(env)
    }

    /// Fetches dataset metadata; the up-front reachability and credential
    /// check. A failure here aborts the run before any transfer starts.
    pub async fn dataset_metadata(&self) -> Result<DatasetInfo, ApiError> {
        self.get_data(&self.dataset_url("/")).await
    }

    /// Lists every file in the latest dataset version.
    pub async fn list_files(&self) -> Result<Vec<ListedFile>, ApiError> {
        self.get_data(&self.dataset_url("/versions/:latest/files"))
            .await
    }

    /// Returns the currently-held dataset locks (empty when unlocked).
    pub async fn locks(&self) -> Result<Vec<LockInfo>, ApiError> {
        self.get_data(&self.dataset_url("/locks")).await
    }

    /// Requests pre-authorized storage locations for a direct upload of
    /// `size` bytes. A 404 means the server does not support direct upload
    /// ([`ApiError::is_unsupported`]).
    pub async fn request_upload_urls(&self, size: u64) -> Result<UploadTicket, ApiError> {
        let url = self.dataset_url(&format!("/uploadurls?size={size}"));
        self.get_data(&url).await
    }

    /// Streams one file through the API server (proxied upload) and returns
    /// the add-files response data.
    pub async fn add_file_proxied(
        &self,
        path: &Path,
        file_name: &str,
        directory_label: Option<&str>,
        size: u64,
        observer: Option<ChunkObserver>,
    ) -> Result<AddFilesData, ApiError> {
        let json_data = serde_json::json!({
            "description": "",
            "directoryLabel": directory_label,
            "categories": [],
            "restrict": false,
        });

        let body = file_body(path, observer).await?;
        let part = reqwest::multipart::Part::stream_with_length(body, size)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ApiError::Protocol(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("jsonData", json_data.to_string());

        debug!(file = %file_name, size, "proxied upload");
        let resp = self
            .api_post(&self.dataset_url("/add"))
            .multipart(form)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let env: Envelope<AddFilesData> = resp.json().await?;
        unwrap_envelope(env)
    }

    /// PUTs one file body to a pre-authorized storage location, streaming
    /// it from disk. Returns the storage ETag (may be empty).
    pub async fn put_file(
        &self,
        url: &str,
        path: &Path,
        size: u64,
        observer: Option<ChunkObserver>,
    ) -> Result<String, ApiError> {
        let body = file_body(path, observer).await?;
        let resp = self
            .http
            .put(self.absolute(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(etag_of(&resp))
    }

    /// PUTs one multipart part (already read from disk) to its storage
    /// location. Returns the part's ETag, needed for completion.
    pub async fn put_part(&self, url: &str, data: Vec<u8>) -> Result<String, ApiError> {
        let resp = self
            .http
            .put(self.absolute(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(etag_of(&resp))
    }

    /// Completes a multipart upload. Parts are listed in ascending
    /// part-index order regardless of the order they finished uploading.
    pub async fn complete_multipart(
        &self,
        url: &str,
        etags: &BTreeMap<u32, String>,
    ) -> Result<(), ApiError> {
        let mut body = serde_json::Map::new();
        for (part, etag) in etags {
            body.insert(part.to_string(), serde_json::Value::String(etag.clone()));
        }
        let resp = self
            .http
            .put(self.absolute(url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::Value::Object(body))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Aborts an incomplete multipart upload. Best-effort cleanup.
    pub async fn abort_multipart(&self, url: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .delete(self.absolute(url))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Registers directly-uploaded objects with the dataset, creating the
    /// catalog entries.
    pub async fn register_files(
        &self,
        files: &[FileRegistration],
    ) -> Result<AddFilesData, ApiError> {
        let payload = serde_json::json!({ "files": files });
        let resp = self
            .api_post(&self.dataset_url("/addFiles"))
            .json(&payload)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let env: Envelope<AddFilesData> = resp.json().await?;
        unwrap_envelope(env)
    }
}

/// Opens `path` as a streaming request body, feeding each chunk to the
/// observer as it goes out.
async fn file_body(path: &Path, observer: Option<ChunkObserver>) -> Result<reqwest::Body, ApiError> {
    let file = tokio::fs::File::open(path).await?;
    let stream = tokio_util::io::ReaderStream::new(file).inspect(move |chunk| {
        if let (Some(obs), Ok(bytes)) = (observer.as_ref(), chunk.as_ref()) {
            obs(bytes);
        }
    });
    Ok(reqwest::Body::wrap_stream(stream))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::from_status(status.as_u16(), body))
}

fn unwrap_envelope<T>(env: Envelope<T>) -> Result<T, ApiError> {
    if env.status != "OK" {
        return Err(ApiError::Protocol(
            env.message
                .unwrap_or_else(|| format!("server status {}", env.status)),
        ));
    }
    env.data
        .ok_or_else(|| ApiError::Protocol("response envelope has no data".into()))
}

fn etag_of(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_client(base_url: &str) -> ApiClient {
        ApiClient::new(&ApiClientConfig {
            base_url: base_url.to_string(),
            api_key: "secret-key".into(),
            dataset_pid: "doi:10.5072/FK2/ABCDEF".into(),
            request_timeout: Duration::from_secs(5),
            concurrency: 2,
        })
        .unwrap()
    }

    /// Starts a mock HTTP server that captures the request and responds
    /// with the given status and JSON body.
    async fn mock_server(
        status: u16,
        body: &str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let body = body.to_string();

        let handle = tokio::spawn(async move {
            let mut captured = String::new();
            if let Ok((mut stream, _)) = listener.accept().await {
                // Read until the client pauses; streamed bodies arrive in
                // several packets.
                let mut raw = Vec::new();
                let mut buf = vec![0u8; 16384];
                loop {
                    match tokio::time::timeout(
                        Duration::from_millis(200),
                        stream.read(&mut buf),
                    )
                    .await
                    {
                        Ok(Ok(n)) if n > 0 => raw.extend_from_slice(&buf[..n]),
                        _ => break,
                    }
                }
                captured = String::from_utf8_lossy(&raw).into_owned();
                let resp = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            captured
        });

        (url, handle)
    }

    #[tokio::test]
    async fn list_files_decodes_and_sends_key() {
        let body = r#"{"status":"OK","data":[
            {"label":"a.tab","directoryLabel":"d",
             "dataFile":{"id":1,"filesize":9,"checksum":{"type":"MD5","value":"aa"}}}
        ]}"#;
        let (url, handle) = mock_server(200, body).await;
        let client = test_client(&url);

        let files = client.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].label, "a.tab");

        let request = handle.await.unwrap();
        assert!(request.contains("X-Dataverse-key: secret-key"));
        assert!(request.contains("versions/:latest/files"));
        // DOI is percent-encoded in the query string.
        assert!(request.contains("persistentId=doi%3A10%2E5072%2FFK2%2FABCDEF"));
    }

    #[tokio::test]
    async fn server_error_maps_to_transient() {
        let (url, _handle) = mock_server(503, "overloaded").await;
        let client = test_client(&url);
        let err = client.locks().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn auth_failure_is_permanent() {
        let (url, _handle) = mock_server(401, "bad key").await;
        let client = test_client(&url);
        let err = client.dataset_metadata().await.unwrap_err();
        assert!(matches!(err, ApiError::Auth { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn envelope_error_status_is_protocol_error() {
        let body = r#"{"status":"ERROR","message":"no such dataset"}"#;
        let (url, _handle) = mock_server(200, body).await;
        let client = test_client(&url);
        let err = client.dataset_metadata().await.unwrap_err();
        assert!(matches!(err, ApiError::Protocol(m) if m.contains("no such dataset")));
    }

    #[tokio::test]
    async fn uploadurls_404_is_unsupported() {
        let (url, _handle) = mock_server(404, "not found").await;
        let client = test_client(&url);
        let err = client.request_upload_urls(100).await.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn complete_multipart_lists_parts_ascending() {
        let (url, handle) = mock_server(200, "{}").await;
        let client = test_client(&url);

        // Inserted out of order; BTreeMap iteration is ascending.
        let mut etags = BTreeMap::new();
        etags.insert(3, "e3".to_string());
        etags.insert(1, "e1".to_string());
        etags.insert(2, "e2".to_string());

        client
            .complete_multipart(&format!("{url}/complete"), &etags)
            .await
            .unwrap();

        let request = handle.await.unwrap();
        let json_start = request.find('{').unwrap();
        let payload = &request[json_start..];
        let p1 = payload.find("\"1\"").unwrap();
        let p2 = payload.find("\"2\"").unwrap();
        let p3 = payload.find("\"3\"").unwrap();
        assert!(p1 < p2 && p2 < p3);
    }

    #[tokio::test]
    async fn put_file_streams_and_observes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let (url, handle) = mock_server(200, "").await;
        let client = test_client(&url);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let observer: ChunkObserver = Arc::new(move |chunk: &[u8]| {
            seen_cb.lock().unwrap().extend_from_slice(chunk);
        });

        client
            .put_file(&format!("{url}/storage"), &path, 10, Some(observer))
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), b"0123456789");
        let request = handle.await.unwrap();
        assert!(request.starts_with("PUT /storage"));
    }

    #[tokio::test]
    async fn relative_storage_urls_resolve_against_base() {
        let (url, handle) = mock_server(200, "").await;
        let client = test_client(&url);
        client.put_part("/mpupload/part1", b"data".to_vec()).await.unwrap();
        let request = handle.await.unwrap();
        assert!(request.starts_with("PUT /mpupload/part1"));
    }
}
