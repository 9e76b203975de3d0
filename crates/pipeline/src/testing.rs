//! Hand-written test doubles for the service and transport boundaries.

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use courier_protocol::{
    ChatId, Encoding, FetchRequest, FetchedFile, Fetcher, MediaInfo, MediaResolver, MediaStream,
    MediaTool, MessageId, MessagingTransport, ProgressFn, ServiceError, ServiceFuture, TorrentDaemon,
    TorrentFile, TorrentFilter, TorrentInfo, TransportError, TransportFuture, UnitKind,
};

/// An attachment as seen by [`RecordingTransport`] at send time.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: UnitKind,
    pub caption: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Transport that records every call and can fail a chosen attachment.
pub struct RecordingTransport {
    next_id: AtomicI32,
    texts: Mutex<Vec<String>>,
    edits: Mutex<Vec<String>>,
    deletes: Mutex<Vec<MessageId>>,
    attachments: Mutex<Vec<Attachment>>,
    attempts: AtomicUsize,
    fail_attachment: Option<usize>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Fails the `k`-th attachment (1-based).
    pub fn failing_attachment(k: usize) -> Arc<Self> {
        Arc::new(Self::build(Some(k)))
    }

    fn build(fail_attachment: Option<usize>) -> Self {
        Self {
            next_id: AtomicI32::new(100),
            texts: Mutex::default(),
            edits: Mutex::default(),
            deletes: Mutex::default(),
            attachments: Mutex::default(),
            attempts: AtomicUsize::new(0),
            fail_attachment,
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<MessageId> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.lock().unwrap().clone()
    }

    fn attach(&self, kind: UnitKind, path: &Path, caption: &str) -> Result<(), TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_attachment == Some(attempt) {
            return Err(TransportError::Other("upload rejected".into()));
        }
        let bytes = std::fs::read(path).map_err(|e| TransportError::Other(e.to_string()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.attachments.lock().unwrap().push(Attachment {
            kind,
            caption: caption.to_string(),
            file_name,
            bytes,
        });
        Ok(())
    }
}

impl MessagingTransport for RecordingTransport {
    fn send_text<'a>(&'a self, _chat: ChatId, text: &'a str) -> TransportFuture<'a, MessageId> {
        Box::pin(async move {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)))
        })
    }

    fn edit_text<'a>(&'a self, _chat: ChatId, _message: MessageId, text: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.edits.lock().unwrap().push(text.to_string());
            Ok(())
        })
    }

    fn delete_message(&self, _chat: ChatId, message: MessageId) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.deletes.lock().unwrap().push(message);
            Ok(())
        })
    }

    fn send_document<'a>(&'a self, _chat: ChatId, path: &'a Path, caption: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move { self.attach(UnitKind::Document, path, caption) })
    }

    fn send_video<'a>(&'a self, _chat: ChatId, path: &'a Path, caption: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move { self.attach(UnitKind::Video, path, caption) })
    }
}

enum FetchBehavior {
    Serve { name: String, bytes: Vec<u8> },
    Fail(Mutex<Option<ServiceError>>),
}

/// Fetcher that writes canned bytes or fails once with a given error.
pub struct MockFetcher {
    behavior: FetchBehavior,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MockFetcher {
    pub fn serving(name: &str, bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            behavior: FetchBehavior::Serve {
                name: name.to_string(),
                bytes,
            },
            requests: Mutex::default(),
        })
    }

    pub fn failing(err: ServiceError) -> Arc<Self> {
        Arc::new(Self {
            behavior: FetchBehavior::Fail(Mutex::new(Some(err))),
            requests: Mutex::default(),
        })
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    fn fetch<'a>(&'a self, request: &'a FetchRequest, on_progress: ProgressFn) -> ServiceFuture<'a, FetchedFile> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            match &self.behavior {
                FetchBehavior::Serve { name, bytes } => {
                    let path = request.dest_dir.join(name);
                    tokio::fs::write(&path, bytes).await?;
                    let size = bytes.len() as u64;
                    on_progress(size, Some(size));
                    Ok(FetchedFile {
                        path,
                        file_name: name.clone(),
                        size,
                    })
                }
                FetchBehavior::Fail(err) => Err(err
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or_else(|| ServiceError::Network("already failed".into()))),
            }
        })
    }
}

/// Resolver returning a canned [`MediaInfo`] and an in-memory stream.
pub struct MockResolver {
    info: Mutex<Option<Result<MediaInfo, ServiceError>>>,
    bytes: Vec<u8>,
    opened: Mutex<Vec<String>>,
}

impl MockResolver {
    pub fn new(info: Result<MediaInfo, ServiceError>, bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(Some(info)),
            bytes,
            opened: Mutex::default(),
        })
    }

    /// Encoding ids passed to `open_stream`.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl MediaResolver for MockResolver {
    fn resolve<'a>(&'a self, _url: &'a str) -> ServiceFuture<'a, MediaInfo> {
        Box::pin(async move {
            self.info
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ServiceError::Network("already resolved".into())))
        })
    }

    fn open_stream<'a>(&'a self, _url: &'a str, encoding: &'a Encoding) -> ServiceFuture<'a, MediaStream> {
        Box::pin(async move {
            self.opened.lock().unwrap().push(encoding.id.clone());
            Ok(MediaStream {
                total: Some(self.bytes.len() as u64),
                reader: Box::pin(Cursor::new(self.bytes.clone())),
            })
        })
    }
}

/// Torrent daemon driven by a script of list responses.
///
/// Each `list_torrents` call pops the next response; the last one repeats.
pub struct MockDaemon {
    script: Mutex<VecDeque<Vec<TorrentInfo>>>,
    files: Vec<TorrentFile>,
    added: Mutex<Vec<String>>,
    deleted: Mutex<Vec<(String, bool)>>,
    list_calls: AtomicUsize,
    add_error: Mutex<Option<ServiceError>>,
}

impl MockDaemon {
    pub fn new(script: Vec<Vec<TorrentInfo>>, files: Vec<TorrentFile>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            files,
            added: Mutex::default(),
            deleted: Mutex::default(),
            list_calls: AtomicUsize::new(0),
            add_error: Mutex::default(),
        })
    }

    pub fn fail_add(&self, err: ServiceError) {
        *self.add_error.lock().unwrap() = Some(err);
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, bool)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl TorrentDaemon for MockDaemon {
    fn login(&self) -> ServiceFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn add_magnet<'a>(&'a self, magnet: &'a str, _save_path: Option<&'a str>) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            if let Some(err) = self.add_error.lock().unwrap().take() {
                return Err(err);
            }
            self.added.lock().unwrap().push(magnet.to_string());
            Ok(())
        })
    }

    fn list_torrents<'a>(&'a self, _filter: &'a TorrentFilter) -> ServiceFuture<'a, Vec<TorrentInfo>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            Ok(next.unwrap_or_default())
        })
    }

    fn list_files<'a>(&'a self, _hash: &'a str) -> ServiceFuture<'a, Vec<TorrentFile>> {
        Box::pin(async move { Ok(self.files.clone()) })
    }

    fn delete_torrent<'a>(&'a self, hash: &'a str, delete_files: bool) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            self.deleted.lock().unwrap().push((hash.to_string(), delete_files));
            Ok(())
        })
    }
}

/// A torrent of 500 bytes named "Some Torrent" at `progress` (0.0..=1.0).
pub fn torrent(hash: &str, progress: f64) -> TorrentInfo {
    TorrentInfo {
        hash: hash.to_string(),
        name: "Some Torrent".into(),
        size_bytes: 500,
        progress,
        download_speed_bps: 1024,
        state: if progress >= 1.0 { "uploading" } else { "downloading" }.into(),
        num_seeds: 5,
        num_peers: 2,
        save_path: "/downloads".into(),
    }
}

/// Media tool that pretends every file lasts `duration` seconds and cuts by
/// copying the matching byte range.
pub struct ByteRangeMediaTool {
    pub duration: f64,
}

impl MediaTool for ByteRangeMediaTool {
    fn probe_duration<'a>(&'a self, _path: &'a Path) -> ServiceFuture<'a, f64> {
        Box::pin(async move { Ok(self.duration) })
    }

    fn cut_stream_copy<'a>(
        &'a self,
        path: &'a Path,
        start_secs: f64,
        duration_secs: f64,
        out: &'a Path,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let data = tokio::fs::read(path).await?;
            let len = data.len() as f64;
            let from = ((start_secs / self.duration) * len) as usize;
            let to = (((start_secs + duration_secs) / self.duration) * len).min(len) as usize;
            tokio::fs::write(out, &data[from.min(data.len())..to.max(from).min(data.len())]).await?;
            Ok(())
        })
    }
}
