//! Shared plumbing for provider clients: authenticated JSON calls, artifact
//! download and persistence, image encoding, and the bounded poll loop.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProviderError;
use crate::telemetry::current_traceparent;

/// One provider's HTTP endpoint plus where its artifacts land.
#[derive(Debug, Clone)]
pub struct HttpBase {
    slug: &'static str,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    output_dir: PathBuf,
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl HttpBase {
    pub fn new(
        slug: &'static str,
        client: reqwest::Client,
        endpoint: &meshconf::ProviderEndpoint,
        output_dir: PathBuf,
        default_interval: Duration,
        default_deadline: Duration,
    ) -> Self {
        Self {
            slug,
            client,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone().filter(|k| !k.is_empty()),
            output_dir,
            poll_interval: endpoint
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(default_interval),
            deadline: endpoint
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_deadline),
        }
    }

    pub fn slug(&self) -> &'static str {
        self.slug
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Absolute URLs pass through; paths are joined onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Every request is bounded by the provider deadline.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, self.url(path))
            .timeout(self.deadline);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(tp) = current_traceparent() {
            builder = builder.header("traceparent", tp);
        }
        builder
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = resp.status();

        // GPU busy on self-hosted backends
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(5);
            warn!(provider = self.slug, retry_after, "provider busy");
            return Err(ProviderError::Status {
                provider: self.slug.to_string(),
                status: status.as_u16(),
                body: format!("busy, retry after {}s", retry_after),
            });
        }

        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(ProviderError::Status {
                provider: self.slug.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn json_body(&self, resp: reqwest::Response) -> Result<Value, ProviderError> {
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode {
            provider: self.slug.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, ProviderError> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        let resp = self.check(resp).await?;
        self.json_body(resp).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        let resp = self.check(resp).await?;
        self.json_body(resp).await
    }

    pub async fn post_for_bytes(&self, path: &str, body: &Value) -> Result<Bytes, ProviderError> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        let resp = self.check(resp).await?;
        Ok(resp.bytes().await?)
    }

    /// GET `path` and report whether it answered 2xx.
    pub async fn probe(&self, path: &str) -> bool {
        match self
            .request(reqwest::Method::GET, path)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(provider = self.slug, error = %e, "health probe failed");
                false
            }
        }
    }

    /// Fetch a remote artifact into the output directory.
    pub async fn download_artifact(&self, url: &str, extension: &str) -> Result<PathBuf, ProviderError> {
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        let resp = self.check(resp).await?;
        let bytes = resp.bytes().await?;
        self.persist_bytes(&bytes, extension).await
    }

    /// Write an in-memory artifact to the output directory.
    pub async fn persist_bytes(&self, bytes: &[u8], extension: &str) -> Result<PathBuf, ProviderError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(format!(
            "{}-{}.{}",
            self.slug,
            uuid::Uuid::new_v4(),
            extension.trim_start_matches('.')
        ));
        tokio::fs::write(&path, bytes).await?;
        debug!(provider = self.slug, path = %path.display(), bytes = bytes.len(), "artifact written");
        Ok(path)
    }

    pub async fn persist_base64(&self, encoded: &str, extension: &str) -> Result<PathBuf, ProviderError> {
        let bytes = BASE64.decode(encoded).map_err(|e| ProviderError::Decode {
            provider: self.slug.to_string(),
            message: format!("invalid base64 artifact: {}", e),
        })?;
        self.persist_bytes(&bytes, extension).await
    }
}

/// Read a local file and base64-encode it.
pub async fn encode_file_base64(path: &Path) -> Result<String, ProviderError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(BASE64.encode(bytes))
}

/// Base64 of a local image.
pub async fn encode_image_base64(path: &Path) -> Result<String, ProviderError> {
    encode_file_base64(path).await
}

/// `data:` URI for a local image, for APIs that take image URLs.
pub async fn image_data_uri(path: &Path) -> Result<String, ProviderError> {
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(format!("data:{};base64,{}", mime, encode_image_base64(path).await?))
}

/// One observation of a remote job.
#[derive(Debug)]
pub enum PollStatus<T> {
    Pending,
    Done(T),
    Failed(String),
}

/// How a poll loop ended.
#[derive(Debug, PartialEq)]
pub enum PollOutcome<T> {
    Done(T),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Call `check` every `interval` until it reports a terminal status, the
/// wall-clock `deadline` passes, or `cancel` fires. Errors from `check`
/// end the loop. A `check` still in flight at the deadline is abandoned.
pub async fn poll_until_done<T, F, Fut>(
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<PollOutcome<T>, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, ProviderError>>,
{
    let expires = tokio::time::Instant::now() + deadline;
    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }
        let status = tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            observed = tokio::time::timeout_at(expires, check()) => match observed {
                Ok(status) => status?,
                Err(_) => {
                    warn!(deadline_ms = deadline.as_millis() as u64, "status check outlived the poll deadline");
                    return Ok(PollOutcome::TimedOut);
                }
            },
        };
        match status {
            PollStatus::Done(value) => return Ok(PollOutcome::Done(value)),
            PollStatus::Failed(message) => return Ok(PollOutcome::Failed(message)),
            PollStatus::Pending => {}
        }
        if tokio::time::Instant::now() + interval > expires {
            return Ok(PollOutcome::TimedOut);
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn base(dir: &Path) -> HttpBase {
        HttpBase::new(
            "test",
            reqwest::Client::new(),
            &meshconf::ProviderEndpoint::at("http://localhost:9000/"),
            dir.to_path_buf(),
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_url_join() {
        let dir = tempfile::tempdir().unwrap();
        let b = base(dir.path());
        assert_eq!(b.url("/status/1"), "http://localhost:9000/status/1");
        assert_eq!(b.url("task"), "http://localhost:9000/task");
        assert_eq!(b.url("https://cdn.example/x.glb"), "https://cdn.example/x.glb");
    }

    #[test]
    fn test_endpoint_overrides() {
        let mut endpoint = meshconf::ProviderEndpoint::at("http://x");
        endpoint.poll_interval_ms = Some(250);
        endpoint.timeout_secs = Some(9);
        endpoint.api_key = Some(String::new());
        let b = HttpBase::new(
            "x",
            reqwest::Client::new(),
            &endpoint,
            PathBuf::from("/tmp"),
            Duration::from_secs(2),
            Duration::from_secs(600),
        );
        assert_eq!(b.poll_interval, Duration::from_millis(250));
        assert_eq!(b.deadline, Duration::from_secs(9));
        assert!(!b.has_api_key());
    }

    #[tokio::test]
    async fn test_persist_and_encode() {
        let dir = tempfile::tempdir().unwrap();
        let b = base(dir.path());
        let path = b.persist_bytes(b"glTF", ".glb").await.unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().unwrap(), "glb");
        assert_eq!(encode_image_base64(&path).await.unwrap(), "Z2xURg==");

        let decoded = b.persist_base64("Z2xURg==", "glb").await.unwrap();
        assert_eq!(tokio::fs::read(decoded).await.unwrap(), b"glTF");
        assert!(b.persist_base64("!!!", "glb").await.is_err());
    }

    #[tokio::test]
    async fn test_data_uri_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.JPG");
        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(image_data_uri(&path).await.unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_poll_done_after_pending() {
        let calls = AtomicU32::new(0);
        let outcome = poll_until_done(
            Duration::from_millis(5),
            Duration::from_secs(5),
            &CancellationToken::new(),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(if n < 2 {
                        PollStatus::Pending
                    } else {
                        PollStatus::Done(n)
                    })
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Done(2));
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let started = Instant::now();
        let outcome: PollOutcome<()> = poll_until_done(
            Duration::from_millis(20),
            Duration::from_millis(100),
            &CancellationToken::new(),
            || async { Ok(PollStatus::Pending) },
        )
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_poll_deadline_bounds_hung_check() {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            poll_until_done::<(), _, _>(
                Duration::from_millis(10),
                Duration::from_millis(200),
                &CancellationToken::new(),
                || std::future::pending(),
            ),
        )
        .await
        .expect("poll loop must honour its deadline")
        .unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_poll_cancel_interrupts_hung_check() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let outcome: PollOutcome<()> = poll_until_done(
            Duration::from_millis(10),
            Duration::from_secs(30),
            &cancel,
            || std::future::pending(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_poll_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: PollOutcome<()> = poll_until_done(
            Duration::from_millis(5),
            Duration::from_secs(5),
            &cancel,
            || async { Ok(PollStatus::Pending) },
        )
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_poll_remote_failure() {
        let outcome: PollOutcome<()> = poll_until_done(
            Duration::from_millis(5),
            Duration::from_secs(5),
            &CancellationToken::new(),
            || async { Ok(PollStatus::Failed("out of memory".to_string())) },
        )
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Failed("out of memory".to_string()));
    }
}
