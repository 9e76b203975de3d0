//! Byte-level transfer helpers: human-readable sizes, speed tracking,
//! throttled progress messages and raw byte-range splitting.

mod format;
mod notifier;
mod progress;
mod split;
mod validation;

pub use format::{format_duration, format_size, format_speed, progress_bar};
pub use notifier::{NotifierConfig, RateLimitedNotifier, normalize_progress_text, render_progress};
pub use progress::{ProgressState, SpeedCalculator};
pub use split::{COPY_BUFFER_SIZE, copy_with_progress, split_file};
pub use validation::{sanitize_file_name, validate_relative_path};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid part size: {0}")]
    InvalidPartSize(u64),
}
