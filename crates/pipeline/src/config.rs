//! Pipeline configuration.
//!
//! Every field has a serde default so partial config files deserialize.

use std::path::PathBuf;

use courier_packager::PlanOptions;
use courier_transfer::NotifierConfig;
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Top-level pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory under which per-request workspaces are created.
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,
    /// Largest attachment the transport accepts.
    #[serde(default = "default_unit_ceiling_bytes")]
    pub unit_ceiling_bytes: u64,
    #[serde(default = "default_factor")]
    pub safety_margin: f64,
    /// Expected archived size as a fraction of the original.
    #[serde(default = "default_factor")]
    pub compression_estimate: f64,
    /// Cut oversized videos into playable segments instead of raw parts.
    #[serde(default = "default_true")]
    pub prefer_playable_media: bool,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub acquire: AcquireConfig,
}

/// Source acquisition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireConfig {
    /// Total attempts for a direct download.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Attempts to find a freshly added torrent in the daemon's list.
    #[serde(default = "default_torrent_lookup_retries")]
    pub torrent_lookup_retries: u32,
    #[serde(default = "default_torrent_lookup_delay_ms")]
    pub torrent_lookup_delay_ms: u64,
    #[serde(default = "default_torrent_poll_interval_ms")]
    pub torrent_poll_interval_ms: u64,
    /// Upper bound on a whole torrent download.
    #[serde(default = "default_torrent_timeout_secs")]
    pub torrent_timeout_secs: u64,
    /// Save path passed to the daemon; the daemon's default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_save_path: Option<String>,
    /// Where the daemon's save path is readable locally (e.g. a mounted share).
    /// The save path reported by the daemon is used as-is when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_download_root: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub remove_torrent_after_copy: bool,
    /// Host suffixes routed to the streaming resolver.
    #[serde(default = "default_streaming_domains")]
    pub streaming_domains: Vec<String>,
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("courier")
}

fn default_unit_ceiling_bytes() -> u64 {
    2000 * MIB
}

fn default_factor() -> f64 {
    0.9
}

fn default_true() -> bool {
    true
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_torrent_lookup_retries() -> u32 {
    3
}

fn default_torrent_lookup_delay_ms() -> u64 {
    2_000
}

fn default_torrent_poll_interval_ms() -> u64 {
    5_000
}

fn default_torrent_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_streaming_domains() -> Vec<String> {
    ["youtube.com", "youtu.be", "youtube-nocookie.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scratch_root: default_scratch_root(),
            unit_ceiling_bytes: default_unit_ceiling_bytes(),
            safety_margin: default_factor(),
            compression_estimate: default_factor(),
            prefer_playable_media: true,
            notifier: NotifierConfig::default(),
            acquire: AcquireConfig::default(),
        }
    }
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            fetch_retries: default_fetch_retries(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            torrent_lookup_retries: default_torrent_lookup_retries(),
            torrent_lookup_delay_ms: default_torrent_lookup_delay_ms(),
            torrent_poll_interval_ms: default_torrent_poll_interval_ms(),
            torrent_timeout_secs: default_torrent_timeout_secs(),
            daemon_save_path: None,
            local_download_root: None,
            remove_torrent_after_copy: true,
            streaming_domains: default_streaming_domains(),
        }
    }
}

impl PipelineConfig {
    /// Planner options derived from this config.
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            safety_margin: self.safety_margin,
            compression_estimate: self.compression_estimate,
            prefer_playable_media: self.prefer_playable_media,
            ..PlanOptions::new(self.unit_ceiling_bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.unit_ceiling_bytes, 2000 * MIB);
        assert_eq!(cfg.safety_margin, 0.9);
        assert_eq!(cfg.acquire.fetch_retries, 3);
        assert_eq!(cfg.acquire.torrent_poll_interval_ms, 5_000);
        assert!(cfg.acquire.remove_torrent_after_copy);
        assert!(cfg.acquire.streaming_domains.contains(&"youtu.be".to_string()));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"unit_ceiling_bytes": 1024, "acquire": {"fetch_retries": 5}}"#,
        )
        .unwrap();
        assert_eq!(cfg.unit_ceiling_bytes, 1024);
        assert_eq!(cfg.acquire.fetch_retries, 5);
        assert_eq!(cfg.acquire.torrent_lookup_retries, 3);
        assert_eq!(cfg.notifier, NotifierConfig::default());
    }

    #[test]
    fn plan_options_follow_config() {
        let cfg = PipelineConfig {
            unit_ceiling_bytes: 500,
            safety_margin: 0.8,
            prefer_playable_media: false,
            ..PipelineConfig::default()
        };
        let opts = cfg.plan_options();
        assert_eq!(opts.ceiling, 500);
        assert_eq!(opts.safety_margin, 0.8);
        assert!(!opts.prefer_playable_media);
    }
}
