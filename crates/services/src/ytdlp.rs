//! Streaming-site extraction through the `yt-dlp` executable.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use courier_protocol::{Encoding, MediaInfo, MediaResolver, MediaStream, ServiceError, ServiceFuture};
use serde::Deserialize;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

/// `yt-dlp` wrapper implementing [`MediaResolver`].
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn dump_json(&self, url: &str) -> Result<MediaInfo, ServiceError> {
        debug!(program = %self.program.display(), url, "resolving media");
        let output = Command::new(&self.program)
            .args(["-J", "--no-playlist", "--no-warnings", url])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ServiceError::Tool(format!("failed to run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }
        parse_media_info(&output.stdout)
    }

    fn spawn_stream(&self, url: &str, encoding: &Encoding) -> Result<MediaStream, ServiceError> {
        debug!(url, format = %encoding.id, "opening media stream");
        let mut child = Command::new(&self.program)
            .args(["-f", encoding.id.as_str(), "-o", "-", "--no-playlist", "--no-part", "--quiet", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServiceError::Tool(format!("failed to run {}: {e}", self.program.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::Tool("yt-dlp stdout not captured".into()))?;

        Ok(MediaStream {
            total: encoding.filesize,
            reader: Box::pin(ChildReader { child, stdout }),
        })
    }
}

impl MediaResolver for YtDlp {
    fn resolve<'a>(&'a self, url: &'a str) -> ServiceFuture<'a, MediaInfo> {
        Box::pin(self.dump_json(url))
    }

    fn open_stream<'a>(&'a self, url: &'a str, encoding: &'a Encoding) -> ServiceFuture<'a, MediaStream> {
        Box::pin(async move { self.spawn_stream(url, encoding) })
    }
}

/// Child stdout that keeps the process alive for as long as it is read and
/// reports a non-zero exit as an error at end of stream.
struct ChildReader {
    child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for ChildReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.stdout).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before => {
                if let Ok(Some(status)) = this.child.try_wait()
                    && !status.success()
                {
                    return Poll::Ready(Err(io::Error::other(format!("yt-dlp exited with {status}"))));
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[derive(Deserialize)]
struct RawInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Deserialize)]
struct RawFormat {
    format_id: String,
    #[serde(default)]
    ext: String,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    tbr: Option<f64>,
    #[serde(default)]
    filesize: Option<f64>,
    #[serde(default)]
    filesize_approx: Option<f64>,
}

fn has_codec(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| !c.is_empty() && c != "none")
}

/// Converts `yt-dlp -J` output into [`MediaInfo`].
fn parse_media_info(json: &[u8]) -> Result<MediaInfo, ServiceError> {
    let raw: RawInfo = serde_json::from_slice(json)
        .map_err(|e| ServiceError::Tool(format!("unexpected yt-dlp output: {e}")))?;

    let encodings = raw
        .formats
        .into_iter()
        .map(|f| Encoding {
            has_video: has_codec(&f.vcodec),
            has_audio: has_codec(&f.acodec),
            height: f.height.map(|h| h as u32),
            bitrate_kbps: f.tbr,
            filesize: f.filesize.or(f.filesize_approx).map(|s| s as u64),
            id: f.format_id,
            ext: f.ext,
        })
        .collect();

    Ok(MediaInfo {
        title: raw.title,
        encodings,
        duration_secs: raw.duration,
    })
}

fn classify_failure(stderr: &str) -> ServiceError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("video unavailable") || lower.contains("404") || lower.contains("not found") {
        ServiceError::NotFound(stderr.to_string())
    } else if lower.contains("timed out") {
        ServiceError::Timeout(stderr.to_string())
    } else if lower.contains("unsupported url") {
        ServiceError::Invalid(stderr.to_string())
    } else {
        ServiceError::Tool(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "title": "Big Buck Bunny 🐰",
        "duration": 596.5,
        "formats": [
            {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "tbr": 129.5},
            {"format_id": "137", "ext": "mp4", "vcodec": "avc1", "acodec": "none", "height": 1080, "tbr": 4400.0},
            {"format_id": "18", "ext": "mp4", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360, "tbr": 500.1, "filesize": 37000000},
            {"format_id": "22", "ext": "mp4", "vcodec": "avc1.64001F", "acodec": "mp4a.40.2", "height": 720, "tbr": 1200.0, "filesize_approx": 90000000.0}
        ]
    }"#;

    #[test]
    fn parses_formats_and_picks_best_combined() {
        let info = parse_media_info(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.title, "Big Buck Bunny 🐰");
        assert_eq!(info.duration_secs, Some(596.5));
        assert_eq!(info.encodings.len(), 4);

        let audio = &info.encodings[0];
        assert!(!audio.has_video && audio.has_audio);

        let best = info.best_combined().unwrap();
        assert_eq!(best.id, "22");
        assert_eq!(best.filesize, Some(90_000_000));
    }

    #[test]
    fn garbage_output_is_tool_error() {
        assert!(matches!(parse_media_info(b"not json"), Err(ServiceError::Tool(_))));
    }

    #[test]
    fn failures_are_classified() {
        assert!(matches!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Unsupported URL: https://example.com"),
            ServiceError::Invalid(_)
        ));
        assert!(matches!(classify_failure("ERROR: boom"), ServiceError::Tool(_)));
    }

    #[tokio::test]
    async fn missing_program_is_tool_error() {
        let ytdlp = YtDlp::new("/nonexistent/yt-dlp-binary");
        let err = ytdlp.resolve("https://youtu.be/x").await.unwrap_err();
        assert!(matches!(err, ServiceError::Tool(_)));
    }
}
