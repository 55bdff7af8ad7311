//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where saved artifacts land.
    pub output_dir: PathBuf,

    /// Screenshot and recording settings.
    pub capture: CaptureDefaults,

    /// GIF transcoding defaults.
    pub gif: GifDefaults,

    /// Live mirroring settings.
    pub mirror: MirrorDefaults,

    /// Wireless debugging settings.
    pub wireless: WirelessDefaults,

    /// Host tool locations.
    pub adb: HostToolsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureDefaults {
    /// Device-side ceiling passed to `screenrecord --time-limit`.
    pub recording_time_limit_secs: u32,

    /// Wait after the recorder exits before pulling the file.
    pub settle_delay_ms: u64,

    /// Upper bound on waiting for the interrupted recorder to exit.
    pub recorder_exit_timeout_ms: u64,

    /// Where the device writes the recording.
    pub remote_recording_path: String,
}

/// GIF transcoding defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GifDefaults {
    /// Samples per second of source video.
    pub fps: u32,

    /// Output scale relative to the source dimensions.
    pub scale: f64,
}

/// Mirroring parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorDefaults {
    /// Local path of the helper server payload.
    pub server_path: Option<PathBuf>,

    /// Where the payload is pushed on the device.
    pub remote_server_path: String,

    /// Version string the helper server expects as its first argument.
    pub server_version: String,

    /// Maximum video dimension requested from the device.
    pub max_size: u32,

    /// Video bitrate ceiling (bits per second).
    pub video_bit_rate: u32,

    /// Device-side abstract socket the server listens on.
    pub socket_name: String,

    /// Attempts to open the video socket while the server starts.
    pub connect_attempts: u32,

    /// Delay between socket attempts.
    pub connect_retry_ms: u64,

    /// Decoded frames allowed in flight between decoder and renderer.
    pub frame_pool: usize,
}

/// Wireless debugging parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WirelessDefaults {
    /// TCP port the device listens on after the switch.
    pub port: u16,
}

/// Host binaries used by the device and render backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostToolsConfig {
    /// adb executable.
    pub binary: String,

    /// Device serial when more than one device is attached.
    pub serial: Option<String>,

    /// ffmpeg executable.
    pub ffmpeg: String,

    /// ffprobe executable.
    pub ffprobe: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tabsnap=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            recording_time_limit_secs: 180,
            settle_delay_ms: 1500,
            recorder_exit_timeout_ms: 5000,
            remote_recording_path: "/sdcard/tabsnap-screenrecord.mp4".to_string(),
        }
    }
}

impl Default for GifDefaults {
    fn default() -> Self {
        Self { fps: 10, scale: 0.5 }
    }
}

impl Default for MirrorDefaults {
    fn default() -> Self {
        Self {
            server_path: None,
            remote_server_path: "/data/local/tmp/scrcpy-server.jar".to_string(),
            server_version: "2.4".to_string(),
            max_size: 1024,
            video_bit_rate: 8_000_000,
            socket_name: "scrcpy".to_string(),
            connect_attempts: 20,
            connect_retry_ms: 100,
            frame_pool: 4,
        }
    }
}

impl Default for WirelessDefaults {
    fn default() -> Self {
        Self { port: 5555 }
    }
}

impl Default for HostToolsConfig {
    fn default() -> Self {
        Self {
            binary: "adb".to_string(),
            serial: None,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Standard config file location.
    pub fn path() -> PathBuf {
        config_file_path()
    }
}

fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("tabsnap").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device_heuristics() {
        let config = AppConfig::default();
        assert_eq!(config.capture.recording_time_limit_secs, 180);
        assert_eq!(config.capture.settle_delay_ms, 1500);
        assert_eq!(config.wireless.port, 5555);
        assert_eq!(config.output_dir, PathBuf::new());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"capture":{"settle_delay_ms":250}}"#).unwrap();
        assert_eq!(config.capture.settle_delay_ms, 250);
        assert_eq!(config.capture.recording_time_limit_secs, 180);
        assert_eq!(config.mirror.socket_name, "scrcpy");
        assert_eq!(config.adb.binary, "adb");
    }
}
