use std::path::Path;
use std::sync::Arc;

use courier_protocol::{AcquiredPayload, MediaResolver, MediaStream, PayloadItem, ProgressFn};
use courier_transfer::{COPY_BUFFER_SIZE, sanitize_file_name};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use super::{Acquire, AcquireContext, AcquireFuture, or_cancelled, with_byte_progress};
use crate::error::{AcquisitionError, AcquisitionErrorKind};

/// Streaming-site videos through a [`MediaResolver`].
pub struct StreamingSource {
    resolver: Arc<dyn MediaResolver>,
}

impl StreamingSource {
    pub fn new(resolver: Arc<dyn MediaResolver>) -> Self {
        Self { resolver }
    }

    async fn download(&self, url: &str, ctx: &AcquireContext<'_>) -> Result<AcquiredPayload, AcquisitionError> {
        let info = self.resolver.resolve(url).await?;
        let encoding = info.best_combined().cloned().ok_or_else(|| {
            AcquisitionError::not_found("no rendition with both audio and video is available")
        })?;
        debug!(
            request = ctx.token,
            format = %encoding.id,
            height = ?encoding.height,
            "picked encoding"
        );

        let ext = if encoding.ext.is_empty() { "mp4" } else { encoding.ext.as_str() };
        let file_name = format!("{}.{ext}", sanitize_file_name(&info.title, "video"));
        let path = ctx.dest.join(&file_name);

        let stream = self.resolver.open_stream(url, &encoding).await?;
        let size = with_byte_progress(ctx.notifier, |progress| write_stream(stream, &path, progress)).await;
        let size = match size {
            Ok(0) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(AcquisitionError::new(
                    AcquisitionErrorKind::NetworkFailure,
                    "the stream ended without any data",
                ));
            }
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(AcquisitionError::new(
                    AcquisitionErrorKind::NetworkFailure,
                    format!("stream interrupted: {e}"),
                ));
            }
        };

        let title = if info.title.trim().is_empty() { file_name.clone() } else { info.title };
        let item = PayloadItem::new(path, file_name, size);
        Ok(AcquiredPayload::new(title, vec![item], ctx.dest.to_path_buf()))
    }
}

impl Acquire for StreamingSource {
    fn acquire<'a>(&'a self, locator: &'a str, ctx: &'a AcquireContext<'a>) -> AcquireFuture<'a> {
        Box::pin(or_cancelled(ctx.cancel, self.download(locator, ctx)))
    }
}

async fn write_stream(mut stream: MediaStream, path: &Path, progress: ProgressFn) -> std::io::Result<u64> {
    let mut out = BufWriter::new(tokio::fs::File::create(path).await?);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = stream.reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        written += n as u64;
        progress(written, stream.total);
    }
    out.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockResolver, RecordingTransport};
    use courier_protocol::{Encoding, MediaInfo, MessageId, ServiceError};
    use courier_transfer::{NotifierConfig, RateLimitedNotifier};
    use tokio_util::sync::CancellationToken;

    fn encoding(id: &str, video: bool, audio: bool, height: u32) -> Encoding {
        Encoding {
            id: id.into(),
            ext: "mp4".into(),
            has_video: video,
            has_audio: audio,
            height: Some(height),
            bitrate_kbps: None,
            filesize: None,
        }
    }

    fn info(title: &str) -> MediaInfo {
        MediaInfo {
            title: title.into(),
            encodings: vec![
                encoding("18", true, true, 360),
                encoding("22", true, true, 720),
                encoding("137", true, false, 1080),
            ],
            duration_secs: Some(10.0),
        }
    }

    #[tokio::test]
    async fn downloads_best_combined_with_sanitized_name() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = MockResolver::new(Ok(info("Cats / Dogs: the 🐱 movie?")), vec![1u8; 3000]);
        let source = StreamingSource::new(resolver.clone());
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dir.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let payload = source.download("https://youtu.be/abc", &ctx).await.unwrap();

        assert_eq!(resolver.opened(), vec!["22".to_string()]);
        let item = &payload.items[0];
        assert_eq!(item.display_name, "Cats Dogs the movie.mp4");
        assert_eq!(item.size_bytes, 3000);
        assert_eq!(std::fs::metadata(&item.local_path).unwrap().len(), 3000);
        assert_eq!(payload.title, "Cats / Dogs: the 🐱 movie?");
    }

    #[tokio::test]
    async fn no_combined_encoding_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut only_video = info("x");
        only_video.encodings.retain(|e| !e.has_audio);
        let source = StreamingSource::new(MockResolver::new(Ok(only_video), vec![]));
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dir.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let err = source.download("https://youtu.be/abc", &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::NotFound);
    }

    #[tokio::test]
    async fn resolver_failure_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let source = StreamingSource::new(MockResolver::new(
            Err(ServiceError::NotFound("Video unavailable".into())),
            vec![],
        ));
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dir.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let err = source.download("https://youtu.be/abc", &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::NotFound);
    }

    #[tokio::test]
    async fn empty_stream_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = StreamingSource::new(MockResolver::new(Ok(info("empty")), vec![]));
        let transport = RecordingTransport::new();
        let n = RateLimitedNotifier::new(transport, 1, MessageId(1), NotifierConfig::default());
        let ctx = AcquireContext {
            token: "t",
            dest: dir.path(),
            notifier: &n,
            cancel: &CancellationToken::new(),
        };

        let err = source.download("https://youtu.be/abc", &ctx).await.unwrap_err();
        assert_eq!(err.kind, AcquisitionErrorKind::NetworkFailure);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
