//! Backing-service boundaries: HTTP fetch, streaming-media resolution,
//! torrent daemon control and media probe/cut.
//!
//! Concrete clients live in `courier-services`; tests use hand-written
//! mocks. All methods return boxed futures so the traits stay object-safe.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::media::{Encoding, MediaInfo, MediaStream};
use crate::torrent::{TorrentFile, TorrentFilter, TorrentInfo};

/// Errors produced by backing services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("tool failed: {0}")]
    Tool(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Boxed future returned by service calls.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Byte progress callback: `(bytes_so_far, total_if_known)`.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Predicate deciding whether an error must abort remaining retries.
pub type AbortPredicate = Arc<dyn Fn(&ServiceError) -> bool + Send + Sync>;

/// Parameters for a single HTTP download.
#[derive(Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Directory the file is written into.
    pub dest_dir: PathBuf,
    pub headers: Vec<(String, String)>,
    /// Connect/read timeout.
    pub timeout: Duration,
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub abort_on: Option<AbortPredicate>,
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("url", &self.url)
            .field("dest_dir", &self.dest_dir)
            .field("timeout", &self.timeout)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Result of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// Generic HTTP download service.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
        on_progress: ProgressFn,
    ) -> ServiceFuture<'a, FetchedFile>;
}

/// Streaming-site extraction service (YouTube and similar).
pub trait MediaResolver: Send + Sync {
    /// Resolves the title and available encodings of a page.
    fn resolve<'a>(&'a self, url: &'a str) -> ServiceFuture<'a, MediaInfo>;

    /// Opens a byte stream for the chosen encoding.
    fn open_stream<'a>(
        &'a self,
        url: &'a str,
        encoding: &'a Encoding,
    ) -> ServiceFuture<'a, MediaStream>;
}

/// Torrent daemon control API.
///
/// Implementations re-authenticate transparently on an authorization
/// failure and retry the call once.
pub trait TorrentDaemon: Send + Sync {
    fn login(&self) -> ServiceFuture<'_, ()>;

    fn add_magnet<'a>(
        &'a self,
        magnet: &'a str,
        save_path: Option<&'a str>,
    ) -> ServiceFuture<'a, ()>;

    fn list_torrents<'a>(&'a self, filter: &'a TorrentFilter)
    -> ServiceFuture<'a, Vec<TorrentInfo>>;

    fn list_files<'a>(&'a self, hash: &'a str) -> ServiceFuture<'a, Vec<TorrentFile>>;

    fn delete_torrent<'a>(&'a self, hash: &'a str, delete_files: bool) -> ServiceFuture<'a, ()>;
}

/// Media probe/cut tool (ffprobe/ffmpeg).
pub trait MediaTool: Send + Sync {
    /// Returns the container duration in seconds.
    fn probe_duration<'a>(&'a self, path: &'a Path) -> ServiceFuture<'a, f64>;

    /// Copies `[start, start + duration)` of `path` into `out` without re-encoding.
    fn cut_stream_copy<'a>(
        &'a self,
        path: &'a Path,
        start_secs: f64,
        duration_secs: f64,
        out: &'a Path,
    ) -> ServiceFuture<'a, ()>;
}
