use std::time::Duration;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const BAR_WIDTH: usize = 20;

/// Formats a byte count with binary (1024) units and two decimals.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", SIZE_UNITS[unit])
}

/// Formats a transfer rate in bytes per second.
pub fn format_speed(bytes_per_second: f64) -> String {
    let bps = if bytes_per_second.is_finite() && bytes_per_second > 0.0 {
        bytes_per_second as u64
    } else {
        0
    };
    format!("{}/s", format_size(bps))
}

/// Formats a duration as `1h 02m`, `3m 05s` or `12s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Renders a fixed-width text progress bar.
pub fn progress_bar(percent: f64) -> String {
    let p = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
    let filled = ((p / 100.0) * BAR_WIDTH as f64).floor() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}
