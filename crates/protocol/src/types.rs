use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Opaque chat/session identifier on the messaging transport.
pub type ChatId = i64;

/// Identifier of a message previously sent by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// Kind of remote source a request points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    DirectUrl,
    StreamingUrl,
    TorrentMagnet,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::DirectUrl => "direct",
            SourceKind::StreamingUrl => "streaming",
            SourceKind::TorrentMagnet => "torrent",
        };
        f.write_str(s)
    }
}

/// A validated user request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    token: String,
    source: SourceKind,
    locator: String,
    chat_id: ChatId,
}

impl TransferRequest {
    /// Creates a request with a fresh unique token.
    pub fn new(source: SourceKind, locator: impl Into<String>, chat_id: ChatId) -> Self {
        Self {
            token: uuid::Uuid::new_v4().simple().to_string(),
            source,
            locator: locator.into(),
            chat_id,
        }
    }

    /// Unique per-request token, used in log lines and temp directory names.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }
}

/// Extensions treated as playable media.
const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "m4v", "avi", "ts"];

/// One acquired file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadItem {
    pub local_path: PathBuf,
    pub display_name: String,
    pub size_bytes: u64,
}

impl PayloadItem {
    pub fn new(local_path: PathBuf, display_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            local_path,
            display_name: display_name.into(),
            size_bytes,
        }
    }

    /// Returns `true` if the file extension identifies a video container.
    pub fn is_media(&self) -> bool {
        is_media_path(&self.local_path)
    }
}

/// Returns `true` if `path` has a known video container extension.
pub fn is_media_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Everything acquired for one request.
#[derive(Debug, Clone)]
pub struct AcquiredPayload {
    pub items: Vec<PayloadItem>,
    pub total_size_bytes: u64,
    pub source_temp_root: PathBuf,
    /// Display name for the payload as a whole (torrent name, video title, file name).
    pub title: String,
    /// Files that could not be read and were left out.
    pub skipped: Vec<String>,
}

impl AcquiredPayload {
    /// Builds a payload, computing the total size from the items.
    pub fn new(title: impl Into<String>, items: Vec<PayloadItem>, source_temp_root: PathBuf) -> Self {
        let total_size_bytes = items.iter().map(|i| i.size_bytes).sum();
        Self {
            items,
            total_size_bytes,
            source_temp_root,
            title: title.into(),
            skipped: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// How a unit is handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Document,
    Video,
}

/// One attachment to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryUnit {
    pub path: PathBuf,
    /// 1-based position within the delivery.
    pub sequence_index: usize,
    pub sequence_total: usize,
    pub caption: String,
    pub kind: UnitKind,
}

impl DeliveryUnit {
    /// Builds the standard caption for a unit of a multi-part delivery.
    pub fn part_caption(name: &str, index: usize, total: usize) -> String {
        if total <= 1 {
            name.to_string()
        } else {
            format!("{name} (part {index} of {total})")
        }
    }
}

/// Logical phase of a request, used for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Download,
    Package,
    Upload,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Download => "📥 Downloading",
            Phase::Package => "📦 Packaging",
            Phase::Upload => "📤 Uploading",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tokens_are_unique() {
        let a = TransferRequest::new(SourceKind::DirectUrl, "https://example.com/a", 1);
        let b = TransferRequest::new(SourceKind::DirectUrl, "https://example.com/a", 1);
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token().len(), 32);
    }

    #[test]
    fn payload_total_is_sum_of_items() {
        let items = vec![
            PayloadItem::new("/tmp/a.bin".into(), "a.bin", 10),
            PayloadItem::new("/tmp/b.bin".into(), "b.bin", 32),
        ];
        let payload = AcquiredPayload::new("t", items, "/tmp".into());
        assert_eq!(payload.total_size_bytes, 42);
        assert!(!payload.is_empty());
    }

    #[test]
    fn media_detection_by_extension() {
        assert!(PayloadItem::new("/x/movie.MKV".into(), "movie", 1).is_media());
        assert!(PayloadItem::new("/x/clip.mp4".into(), "clip", 1).is_media());
        assert!(!PayloadItem::new("/x/notes.txt".into(), "notes", 1).is_media());
        assert!(!PayloadItem::new("/x/noext".into(), "noext", 1).is_media());
    }

    #[test]
    fn part_caption_single_and_multi() {
        assert_eq!(DeliveryUnit::part_caption("file.zip", 1, 1), "file.zip");
        assert_eq!(
            DeliveryUnit::part_caption("file.zip", 2, 3),
            "file.zip (part 2 of 3)"
        );
    }

    #[test]
    fn source_kind_serde() {
        let json = serde_json::to_string(&SourceKind::TorrentMagnet).unwrap();
        assert_eq!(json, "\"torrent_magnet\"");
        let parsed: SourceKind = serde_json::from_str("\"streaming_url\"").unwrap();
        assert_eq!(parsed, SourceKind::StreamingUrl);
    }
}
