//! Concrete clients for Courier's backing services.
//!
//! Each client implements one of the collaborator traits from
//! `courier-protocol`:
//!
//! - [`HttpFetcher`]: streaming HTTP downloads with retry ([`Fetcher`])
//! - [`QbitClient`]: qBittorrent Web API v2 ([`TorrentDaemon`])
//! - [`YtDlp`]: streaming-site extraction through `yt-dlp` ([`MediaResolver`])
//! - [`Ffmpeg`]: duration probe and stream-copy cuts ([`MediaTool`])
//!
//! [`Fetcher`]: courier_protocol::Fetcher
//! [`TorrentDaemon`]: courier_protocol::TorrentDaemon
//! [`MediaResolver`]: courier_protocol::MediaResolver
//! [`MediaTool`]: courier_protocol::MediaTool

pub mod ffmpeg;
pub mod http;
pub mod qbittorrent;
pub mod ytdlp;

#[cfg(test)]
mod testing;

pub use ffmpeg::Ffmpeg;
pub use http::HttpFetcher;
pub use qbittorrent::QbitClient;
pub use ytdlp::YtDlp;

use courier_protocol::ServiceError;

/// Maps a `reqwest` failure onto the shared service taxonomy.
pub(crate) fn http_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(err.to_string())
    } else if let Some(status) = err.status() {
        ServiceError::Status {
            status: status.as_u16(),
            body: err.to_string(),
        }
    } else {
        ServiceError::Network(err.to_string())
    }
}
