//! Torrent daemon data types (qBittorrent Web API shapes).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A torrent as reported by the daemon's list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub hash: String,
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// Completion in the range `0.0..=1.0`.
    pub progress: f64,
    #[serde(rename = "dlspeed", default)]
    pub download_speed_bps: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub num_seeds: u32,
    #[serde(rename = "num_leechs", default)]
    pub num_peers: u32,
    #[serde(default)]
    pub save_path: String,
}

impl TorrentInfo {
    /// Returns `true` once all pieces are downloaded.
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// Completion as a whole percentage.
    pub fn percent(&self) -> u8 {
        (self.progress.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentFile {
    /// Path relative to the torrent's save path.
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(default)]
    pub progress: f64,
}

/// Filter for the torrent-list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFilter {
    /// Daemon state filter (`all`, `downloading`, `completed`, ...).
    pub state: String,
    /// Restricts the listing to these hashes.
    pub hashes: Vec<String>,
}

impl Default for TorrentFilter {
    fn default() -> Self {
        Self {
            state: "all".into(),
            hashes: Vec::new(),
        }
    }
}

impl TorrentFilter {
    /// Filter matching a single hash.
    pub fn by_hash(hash: &str) -> Self {
        Self {
            hashes: vec![hash.to_string()],
            ..Self::default()
        }
    }
}

static BTIH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)xt=urn:btih:([^&]+)").expect("btih regex is valid")
});

/// Extracts the info-hash from a magnet locator as lowercase hex.
///
/// Accepts both 40-character hex and 32-character base32 hashes.
/// Returns `None` if no well-formed hash is present.
pub fn parse_info_hash(magnet: &str) -> Option<String> {
    let raw = BTIH.captures(magnet)?.get(1)?.as_str();
    match raw.len() {
        40 if raw.chars().all(|c| c.is_ascii_hexdigit()) => Some(raw.to_ascii_lowercase()),
        32 => base32_to_hex(raw),
        _ => None,
    }
}

fn base32_to_hex(input: &str) -> Option<String> {
    let mut bits: u64 = 0;
    let mut nbits = 0u32;
    let mut out = String::with_capacity(40);
    for c in input.chars() {
        let v = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u64 - 'A' as u64,
            c @ '2'..='7' => c as u64 - '2' as u64 + 26,
            _ => return None,
        };
        bits = (bits << 5) | v;
        nbits += 5;
        while nbits >= 8 {
            nbits -= 8;
            out.push_str(&format!("{:02x}", (bits >> nbits) & 0xff));
        }
        bits &= (1 << nbits) - 1;
    }
    Some(out)
}
