//! `ffprobe` duration probe and `ffmpeg` stream-copy cuts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use courier_protocol::{MediaTool, ServiceError, ServiceFuture};
use tokio::process::Command;
use tracing::debug;

/// ffmpeg/ffprobe wrapper implementing [`MediaTool`].
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn probe(&self, path: &Path) -> Result<f64, ServiceError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ServiceError::Tool(format!("failed to run {}: {e}", self.ffprobe.display())))?;

        if !output.status.success() {
            return Err(ServiceError::Tool(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn cut(&self, path: &Path, start: f64, duration: f64, out: &Path) -> Result<(), ServiceError> {
        debug!(input = %path.display(), output = %out.display(), start, duration, "stream-copy cut");
        let output = Command::new(&self.ffmpeg)
            .args(cut_args(path, start, duration, out))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ServiceError::Tool(format!("failed to run {}: {e}", self.ffmpeg.display())))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(out).await;
            return Err(ServiceError::Tool(format!(
                "ffmpeg cut failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl MediaTool for Ffmpeg {
    fn probe_duration<'a>(&'a self, path: &'a Path) -> ServiceFuture<'a, f64> {
        Box::pin(self.probe(path))
    }

    fn cut_stream_copy<'a>(
        &'a self,
        path: &'a Path,
        start_secs: f64,
        duration_secs: f64,
        out: &'a Path,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(self.cut(path, start_secs, duration_secs, out))
    }
}

/// Arguments for a keyframe-aligned cut without re-encoding.
fn cut_args(input: &Path, start: f64, duration: f64, out: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-ss"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(format!("{start:.3}").into());
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    args.push("-t".into());
    args.push(format!("{duration:.3}").into());
    for a in ["-map", "0", "-c", "copy", "-avoid_negative_ts", "make_zero"] {
        args.push(a.into());
    }
    args.push(out.as_os_str().to_owned());
    args
}

fn parse_duration(stdout: &str) -> Result<f64, ServiceError> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| ServiceError::Tool(format!("no usable duration in ffprobe output: {stdout:?}")))
}
