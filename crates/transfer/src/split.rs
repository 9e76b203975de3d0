use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::TransferError;

/// Buffer size for streaming copies: 1 MiB.
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Copies up to `limit` bytes from `reader` into `writer`, calling
/// `on_progress` with the byte count of every buffer written.
///
/// Returns the number of bytes copied (less than `limit` at EOF).
pub fn copy_with_progress<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    limit: u64,
    on_progress: &mut dyn FnMut(u64),
) -> std::io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    while copied < limit {
        let want = (limit - copied).min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        on_progress(n as u64);
    }
    Ok(copied)
}

/// Cuts `source` into sequential byte ranges of at most `part_size` bytes.
///
/// Parts are written to `out_dir` as `{base_name}.001`, `{base_name}.002`, ...
/// and returned in order. Concatenating them reproduces the source exactly.
/// On error, parts written so far are removed.
pub fn split_file(
    source: &Path,
    part_size: u64,
    out_dir: &Path,
    base_name: &str,
    on_progress: &mut dyn FnMut(u64),
) -> Result<Vec<PathBuf>, TransferError> {
    if part_size == 0 {
        return Err(TransferError::InvalidPartSize(part_size));
    }
    crate::validate_relative_path(base_name)?;

    let mut parts = Vec::new();
    match write_parts(source, part_size, out_dir, base_name, on_progress, &mut parts) {
        Ok(()) => Ok(parts),
        Err(e) => {
            for p in &parts {
                let _ = std::fs::remove_file(p);
            }
            Err(e)
        }
    }
}

fn write_parts(
    source: &Path,
    part_size: u64,
    out_dir: &Path,
    base_name: &str,
    on_progress: &mut dyn FnMut(u64),
    parts: &mut Vec<PathBuf>,
) -> Result<(), TransferError> {
    let mut input = File::open(source)?;
    let total = input.metadata()?.len();
    std::fs::create_dir_all(out_dir)?;

    let count = total.div_ceil(part_size).max(1);
    for index in 1..=count {
        let path = out_dir.join(format!("{base_name}.{index:03}"));
        parts.push(path.clone());

        let mut out = BufWriter::new(File::create(&path)?);
        copy_with_progress(&mut input, &mut out, part_size, on_progress)?;
        out.flush()?;
    }

    Ok(())
}
