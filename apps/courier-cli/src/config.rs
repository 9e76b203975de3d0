//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/courier/courier.toml`
//! - Windows: `%APPDATA%/courier/courier.toml`

use std::path::{Path, PathBuf};

use courier_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Full runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub qbittorrent: QbittorrentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// qBittorrent Web API access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QbittorrentConfig {
    /// Torrents are rejected when disabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// External programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp: PathBuf,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:8080".into()
}

fn default_username() -> String {
    "admin".into()
}

fn default_yt_dlp() -> PathBuf {
    "yt-dlp".into()
}

fn default_ffmpeg() -> PathBuf {
    "ffmpeg".into()
}

fn default_ffprobe() -> PathBuf {
    "ffprobe".into()
}

impl Default for QbittorrentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            username: default_username(),
            password: String::new(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: default_yt_dlp(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, or from the default location.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save(&path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Holds the daemon password.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("courier")
            .join("courier.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("courier").join("courier.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/courier/courier.toml"))
    }
}
