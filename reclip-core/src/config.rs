use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Safe MP4 size for smooth delivery: three quarters of 10 MiB.
pub const DEFAULT_SAFE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024 * 3 / 4;
pub const GIF_SIZE_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReclipConfig {
    pub telegram: TelegramSection,
    pub browser: BrowserSection,
    pub download: DownloadSection,
    pub encoder: EncoderSection,
    pub conversation: ConversationSection,
    pub dedup: DedupSection,
    pub logging: LoggingSection,
}

impl ReclipConfig {
    pub fn validate(&self) -> Result<()> {
        let encoder = &self.encoder;
        if encoder.gif_fps_ladder.is_empty() {
            return Err(ConfigError::invalid("encoder.gif_fps_ladder", "must not be empty"));
        }
        if encoder
            .gif_fps_ladder
            .windows(2)
            .any(|pair| pair[0] <= pair[1])
        {
            return Err(ConfigError::invalid(
                "encoder.gif_fps_ladder",
                "must be strictly descending",
            ));
        }
        if encoder.safe_threshold_bytes == 0 {
            return Err(ConfigError::invalid(
                "encoder.safe_threshold_bytes",
                "must be greater than zero",
            ));
        }
        if encoder.crf_ceiling < encoder.base_crf {
            return Err(ConfigError::invalid(
                "encoder.crf_ceiling",
                format!("{} is below base_crf {}", encoder.crf_ceiling, encoder.base_crf),
            ));
        }
        if encoder.bitrate_floor_kbps > encoder.base_bitrate_kbps {
            return Err(ConfigError::invalid(
                "encoder.bitrate_floor_kbps",
                format!(
                    "{} is above base_bitrate_kbps {}",
                    encoder.bitrate_floor_kbps, encoder.base_bitrate_kbps
                ),
            ));
        }
        if self.browser.media_url_markers.is_empty() {
            return Err(ConfigError::invalid(
                "browser.media_url_markers",
                "must list at least one CDN marker",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub api_base: String,
    pub poll_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub accepted_hosts: Vec<String>,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".into(),
            poll_timeout_seconds: 100,
            poll_interval_ms: 1000,
            accepted_hosts: vec!["tiktok".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub user_agent: Option<String>,
    pub navigation_timeout_seconds: u64,
    pub settle_seconds: u64,
    pub media_url_markers: Vec<String>,
    pub auth_url_markers: Vec<String>,
}

impl BrowserSection {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds.clamp(1, 60))
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_secs(self.settle_seconds.min(5))
    }
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            user_agent: None,
            navigation_timeout_seconds: 30,
            settle_seconds: 2,
            media_url_markers: vec!["v16-webapp-prime".into()],
            auth_url_markers: vec!["login".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub user_agent: String,
    pub origin: String,
    pub accept_language: String,
    pub progress_step_percent: u8,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36".into(),
            origin: "https://www.tiktok.com".into(),
            accept_language: "en-US,en;q=0.9".into(),
            progress_step_percent: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    pub ffmpeg_path: PathBuf,
    pub scratch_dir: Option<PathBuf>,
    pub stale_after_minutes: u64,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub pix_fmt: String,
    pub mp4_scale_width: u32,
    pub gif_scale_width: u32,
    pub preview_scale_width: u32,
    pub safe_threshold_bytes: u64,
    pub base_crf: u8,
    pub crf_ceiling: u8,
    pub crf_slope: f64,
    pub base_bitrate_kbps: u32,
    pub bitrate_floor_kbps: u32,
    pub maxrate_factor: f64,
    pub bufsize_factor: f64,
    pub gif_size_limit_bytes: u64,
    pub gif_fps_ladder: Vec<u32>,
    pub mp4_upload_limit_bytes: u64,
}

impl EncoderSection {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("reclip"))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_minutes * 60)
    }
}

impl Default for EncoderSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            scratch_dir: None,
            stale_after_minutes: 60,
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            preset: "veryfast".into(),
            pix_fmt: "yuv420p".into(),
            mp4_scale_width: 720,
            gif_scale_width: 320,
            preview_scale_width: 320,
            safe_threshold_bytes: DEFAULT_SAFE_THRESHOLD_BYTES,
            base_crf: 27,
            crf_ceiling: 30,
            crf_slope: 1.2,
            base_bitrate_kbps: 1200,
            bitrate_floor_kbps: 800,
            maxrate_factor: 1.3,
            bufsize_factor: 2.0,
            gif_size_limit_bytes: GIF_SIZE_LIMIT_BYTES,
            gif_fps_ladder: vec![60, 45, 25, 20, 15, 10],
            mp4_upload_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationSection {
    pub confirmation_timeout_seconds: u64,
    pub max_replans: u32,
    pub rejection_keywords: Vec<String>,
}

impl ConversationSection {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_seconds.min(30))
    }
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            confirmation_timeout_seconds: 30,
            max_replans: 5,
            rejection_keywords: vec!["no".into(), "dislike".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            capacity: 4096,
            ttl_seconds: 6 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ReclipConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let config: ReclipConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/reclip.toml");
        let config = load_config(path).expect("config should parse");
        assert_eq!(config.encoder.gif_fps_ladder, vec![60, 45, 25, 20, 15, 10]);
        assert_eq!(config.encoder.safe_threshold_bytes, 7_864_320);
        assert_eq!(config.conversation.rejection_keywords, vec!["no", "dislike"]);
        assert!(config.telegram.accepted_hosts.contains(&"tiktok".to_string()));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: ReclipConfig = toml::from_str("[encoder]\nbase_crf = 25\n").unwrap();
        assert_eq!(config.encoder.base_crf, 25);
        assert_eq!(config.encoder.crf_ceiling, 30);
        assert_eq!(config.browser.settle_seconds, 2);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_ascending_fps_ladder() {
        let mut config = ReclipConfig::default();
        config.encoder.gif_fps_ladder = vec![10, 25, 60];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "encoder.gif_fps_ladder",
                ..
            })
        ));
    }

    #[test]
    fn timeouts_are_capped() {
        let mut config = ReclipConfig::default();
        config.browser.navigation_timeout_seconds = 600;
        config.browser.settle_seconds = 30;
        config.conversation.confirmation_timeout_seconds = 90;
        assert_eq!(config.browser.navigation_timeout(), Duration::from_secs(60));
        assert_eq!(config.browser.settle_window(), Duration::from_secs(5));
        assert_eq!(
            config.conversation.confirmation_timeout(),
            Duration::from_secs(30)
        );
    }
}
