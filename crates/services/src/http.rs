//! Streaming HTTP downloader.
//!
//! Writes the response body straight to disk in chunks, reporting byte
//! progress after every chunk. Transient failures are retried with a
//! linear backoff; the caller can veto retries for specific error classes.

use std::path::Path;
use std::time::Duration;

use courier_protocol::{FetchRequest, FetchedFile, Fetcher, ProgressFn, ServiceError, ServiceFuture};
use courier_transfer::sanitize_file_name;
use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::http_error;

const USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// `reqwest`-backed implementation of [`Fetcher`].
pub struct HttpFetcher {
    http: reqwest::Client,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(http_error)?;
        Ok(Self {
            http,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Base delay between attempts; attempt `n` waits `n * delay`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn fetch_with_retry(
        &self,
        request: &FetchRequest,
        on_progress: ProgressFn,
    ) -> Result<FetchedFile, ServiceError> {
        let attempts = request.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(request, &on_progress).await {
                Ok(file) => return Ok(file),
                Err(e) => {
                    let vetoed = request.abort_on.as_ref().is_some_and(|abort| abort(&e));
                    if vetoed || !is_retryable(&e) || attempt >= attempts {
                        return Err(e);
                    }
                    warn!(url = %request.url, attempt, error = %e, "download failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        request: &FetchRequest,
        on_progress: &ProgressFn,
    ) -> Result<FetchedFile, ServiceError> {
        let headers = build_headers(&request.headers)?;
        let send = self.http.get(&request.url).headers(headers).send();
        let resp = tokio::time::timeout(request.timeout, send)
            .await
            .map_err(|_| ServiceError::Timeout(format!("no response from {}", request.url)))?
            .map_err(http_error)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ServiceError::NotFound(request.url.clone()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let file_name = file_name_for(&request.url, resp.headers());
        let total = resp.content_length();
        tokio::fs::create_dir_all(&request.dest_dir).await?;
        let path = request.dest_dir.join(&file_name);
        debug!(url = %request.url, path = %path.display(), ?total, "downloading");

        match stream_to_file(resp, &path, request.timeout, total, on_progress).await {
            Ok(size) => Ok(FetchedFile {
                path,
                file_name,
                size,
            }),
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
        on_progress: ProgressFn,
    ) -> ServiceFuture<'a, FetchedFile> {
        Box::pin(self.fetch_with_retry(request, on_progress))
    }
}

async fn stream_to_file(
    resp: reqwest::Response,
    path: &Path,
    read_timeout: Duration,
    total: Option<u64>,
    on_progress: &ProgressFn,
) -> Result<u64, ServiceError> {
    let mut out = BufWriter::new(tokio::fs::File::create(path).await?);
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;

    loop {
        let next = tokio::time::timeout(read_timeout, stream.next())
            .await
            .map_err(|_| ServiceError::Timeout(format!("read stalled after {written} bytes")))?;
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(http_error)?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
        on_progress(written, total);
    }
    out.flush().await?;

    if let Some(expected) = total
        && written != expected
    {
        return Err(ServiceError::Network(format!(
            "connection closed after {written} of {expected} bytes"
        )));
    }
    Ok(written)
}

fn is_retryable(err: &ServiceError) -> bool {
    match err {
        ServiceError::Network(_) | ServiceError::Timeout(_) => true,
        ServiceError::Status { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap, ServiceError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ServiceError::Invalid(format!("bad header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ServiceError::Invalid(format!("bad header value for {name}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Picks a safe local file name from `Content-Disposition` or the URL path.
fn file_name_for(url: &str, headers: &HeaderMap) -> String {
    let from_header = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_file_name);

    let raw = from_header.or_else(|| url_file_name(url)).unwrap_or_default();
    sanitize_file_name(&raw, "download")
}

fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // RFC 5987: charset'lang'percent-encoded
                let encoded = val.splitn(3, '\'').nth(2).unwrap_or(val);
                return Some(percent_decode_str(encoded).decode_utf8_lossy().into_owned());
            }
            "filename" => plain = Some(val.trim_matches('"').to_string()),
            _ => {}
        }
    }
    plain.filter(|n| !n.is_empty())
}

fn url_file_name(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next()?;
    let after_scheme = without_query.split_once("://").map_or(without_query, |(_, r)| r);
    let (_, path) = after_scheme.split_once('/')?;
    let last = path.rsplit('/').find(|s| !s.is_empty())?;
    Some(percent_decode_str(last).decode_utf8_lossy().into_owned())
}
