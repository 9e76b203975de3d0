//! Streaming ZIP archive creation.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use courier_protocol::PayloadItem;
use courier_transfer::{copy_with_progress, split_file, validate_relative_path};
use tracing::debug;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::PackageError;
use crate::worker::{CancelAwareReader, WorkerContext};

/// Entries at or above this size need ZIP64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Streams `items` into a Deflate ZIP at `archive_path`.
///
/// If the finished archive is still larger than `ceiling`, it is replaced
/// by raw parts `{archive}.001`, `{archive}.002`, ... each at most `ceiling`
/// bytes. Returns the produced files in order; on failure nothing is left.
pub(crate) fn write_archive(
    items: &[PayloadItem],
    archive_path: &Path,
    ceiling: u64,
    ctx: &mut WorkerContext,
) -> Result<Vec<PathBuf>, PackageError> {
    if let Err(e) = write_zip(items, archive_path, ctx) {
        let _ = std::fs::remove_file(archive_path);
        return Err(e);
    }

    let size = std::fs::metadata(archive_path)?.len();
    if size <= ceiling {
        return Ok(vec![archive_path.to_path_buf()]);
    }

    debug!(
        archive = %archive_path.display(),
        size,
        ceiling,
        "archive exceeds ceiling, splitting into volumes"
    );
    ctx.check_cancelled()?;
    let dir = archive_path.parent().unwrap_or(Path::new("."));
    let base = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive.zip".into());
    let result = split_file(archive_path, ceiling, dir, &base, &mut |_| {});
    let _ = std::fs::remove_file(archive_path);
    Ok(result?)
}

fn write_zip(items: &[PayloadItem], archive_path: &Path, ctx: &mut WorkerContext) -> Result<(), PackageError> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let mut names = HashSet::new();
    let cancel = ctx.cancel_token();

    for item in items {
        ctx.check_cancelled()?;
        ctx.begin_item(&item.display_name);

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(item.size_bytes >= ZIP64_THRESHOLD);
        zip.start_file(unique_entry_name(item, &mut names), options)?;

        let mut reader = CancelAwareReader::new(File::open(&item.local_path)?, cancel.clone());
        copy_with_progress(&mut reader, &mut zip, u64::MAX, &mut |n| ctx.advance(n))?;
    }

    let mut out = zip.finish()?;
    out.flush()?;
    Ok(())
}

/// Entry name inside the archive: the item's relative display path when
/// safe, its file name otherwise, de-duplicated with a numeric suffix.
fn unique_entry_name(item: &PayloadItem, taken: &mut HashSet<String>) -> String {
    let base = if validate_relative_path(&item.display_name).is_ok() {
        item.display_name.replace('\\', "/")
    } else {
        item.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into())
    };

    claim_name(base, taken)
}

/// Returns `base`, or `base` with a ` (n)` suffix before its extension when
/// the name is already in `taken`. The returned name is added to `taken`.
pub(crate) fn claim_name(base: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let (stem, ext) = match base.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() && !e.contains('/') => (s.to_string(), format!(".{e}")),
        _ => (base.clone(), String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
