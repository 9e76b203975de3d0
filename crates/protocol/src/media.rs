use std::fmt;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

/// One downloadable rendition of a streaming-site video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub id: String,
    pub ext: String,
    pub has_video: bool,
    pub has_audio: bool,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub bitrate_kbps: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
}

impl Encoding {
    /// Returns `true` if the rendition carries both audio and video.
    pub fn is_combined(&self) -> bool {
        self.has_video && self.has_audio
    }
}

/// Resolved streaming-site page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub encodings: Vec<Encoding>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl MediaInfo {
    /// Picks the best combined audio+video encoding.
    ///
    /// Ranking is by height, then bitrate, then file size. Returns `None`
    /// when no rendition carries both streams.
    pub fn best_combined(&self) -> Option<&Encoding> {
        self.encodings
            .iter()
            .filter(|e| e.is_combined())
            .max_by(|a, b| {
                a.height
                    .unwrap_or(0)
                    .cmp(&b.height.unwrap_or(0))
                    .then_with(|| {
                        a.bitrate_kbps
                            .unwrap_or(0.0)
                            .total_cmp(&b.bitrate_kbps.unwrap_or(0.0))
                    })
                    .then_with(|| a.filesize.unwrap_or(0).cmp(&b.filesize.unwrap_or(0)))
            })
    }
}

/// An open media byte stream.
pub struct MediaStream {
    /// Expected length, if the service knows it.
    pub total: Option<u64>,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}
