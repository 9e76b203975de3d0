//! Time-based media segmentation by stream copy.

use std::path::{Path, PathBuf};

use courier_protocol::{MediaTool, PayloadItem, ServiceError, UnitKind};
use courier_transfer::split_file;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::PackageEvent;
use crate::error::PackageError;
use crate::worker::{JobSpan, run_blocking};

/// Cuts `item` into `segments` playable files of equal duration, named
/// after `name` (`movie.mkv` gives `movie.part01.mkv`, ...).
///
/// Stream-copy cuts land on keyframes, so a segment can come out larger
/// than planned; such segments are raw-split to respect `ceiling`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn segment_media(
    tool: &dyn MediaTool,
    item: &PayloadItem,
    name: &str,
    segments: u32,
    out_dir: &Path,
    ceiling: u64,
    span: JobSpan,
    cancel: &CancellationToken,
    events: &mpsc::Sender<PackageEvent>,
) -> Result<Vec<(PathBuf, UnitKind)>, PackageError> {
    let duration = tokio::select! {
        _ = cancel.cancelled() => return Err(PackageError::Cancelled),
        d = tool.probe_duration(&item.local_path) => d?,
    };
    if !duration.is_finite() || duration <= 0.0 {
        return Err(ServiceError::Tool(format!(
            "unusable duration {duration} for {}",
            item.display_name
        ))
        .into());
    }

    let segments = segments.max(1);
    let length = duration / f64::from(segments);
    let (stem, ext) = stem_and_ext(Path::new(name));
    debug!(
        file = %item.display_name,
        duration,
        segments,
        length,
        "cutting media into segments"
    );

    let mut cut = Vec::with_capacity(segments as usize);
    for index in 0..segments {
        let start = length * f64::from(index);
        let len = if index + 1 == segments {
            duration - start
        } else {
            length
        };
        let out = out_dir.join(format!("{stem}.part{:02}.{ext}", index + 1));

        tokio::select! {
            _ = cancel.cancelled() => return Err(PackageError::Cancelled),
            r = tool.cut_stream_copy(&item.local_path, start, len, &out) => r?,
        }
        cut.push(out);

        let done = span.offset + item.size_bytes * u64::from(index + 1) / u64::from(segments);
        let _ = events
            .send(PackageEvent::Progress {
                done,
                total: span.total,
                current: format!("{} segment {}/{segments}", item.display_name, index + 1),
            })
            .await;
    }

    let mut units = Vec::with_capacity(cut.len());
    for path in cut {
        let size = tokio::fs::metadata(&path).await?.len();
        if size <= ceiling {
            units.push((path, UnitKind::Video));
            continue;
        }

        warn!(
            segment = %path.display(),
            size,
            ceiling,
            "segment exceeds ceiling after cut, splitting raw"
        );
        let dir = out_dir.to_path_buf();
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "segment".into());
        let source = path.clone();
        let parts = run_blocking(
            JobSpan {
                offset: span.offset + item.size_bytes,
                total: span.total,
            },
            cancel.clone(),
            events,
            move |_| Ok(split_file(&source, ceiling, &dir, &base, &mut |_| {})?),
        )
        .await?;
        tokio::fs::remove_file(&path).await?;
        units.extend(parts.into_iter().map(|p| (p, UnitKind::Document)));
    }

    Ok(units)
}

fn stem_and_ext(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".into());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".into());
    (stem, ext)
}
