//! Application configuration
//!
//! Configuration is merged from a TOML file and `STREAMWATCH_`-prefixed
//! environment variables. Durations accept human-readable strings
//! (`"10s"`, `"2m"`, `"24h"`).

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for runtime data (persisted streams, thumbnails)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn streams_file(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_STREAMS_FILE)
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_THUMBNAILS_DIR)
    }
}

/// Tunables for the observation pipeline: probe cadence, evaluation
/// windows, and the health/incident thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Supervisor tick interval
    #[serde(with = "duration_serde::duration", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Hard per-request probe deadline
    #[serde(with = "duration_serde::duration", default = "default_probe_timeout")]
    pub probe_timeout: Duration,

    /// Health evaluation window
    #[serde(with = "duration_serde::duration", default = "default_window_short")]
    pub window_short: Duration,

    /// Maximum history query window; also sizes the per-stream sample ring
    #[serde(with = "duration_serde::duration", default = "default_window_long")]
    pub window_long: Duration,

    /// Recent sub-window inspected by the manifest-down RED rule
    #[serde(
        with = "duration_serde::duration",
        default = "default_manifest_red_window"
    )]
    pub manifest_red_window: Duration,

    /// Average TTFB above this goes YELLOW
    #[serde(default = "default_ttfb_yellow_ms")]
    pub ttfb_yellow_ms: f64,

    /// Average download ratio above this goes YELLOW
    #[serde(default = "default_ratio_yellow")]
    pub ratio_yellow: f64,

    /// Consecutive failed probes that force RED
    #[serde(default = "default_red_consecutive_errors")]
    pub red_consecutive_errors: usize,

    /// Window error rate that forces RED
    #[serde(default = "default_red_err_rate")]
    pub red_err_rate: f64,

    /// How long YELLOW must persist before an incident opens
    #[serde(
        with = "duration_serde::duration",
        default = "default_yellow_persistence"
    )]
    pub yellow_persistence: Duration,

    /// How long GREEN must hold before the active incident resolves
    #[serde(with = "duration_serde::duration", default = "default_resolve_hold")]
    pub resolve_hold: Duration,

    /// GREEN->YELLOW->GREEN flips inside this window emit no transition
    #[serde(with = "duration_serde::duration", default = "default_flap_window")]
    pub flap_window: Duration,

    /// Maximum wait for a supervisor to stop during stream deletion
    #[serde(with = "duration_serde::duration", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,

    /// Resolved incidents retained per stream
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,

    /// Timeline events retained per incident
    #[serde(default = "default_timeline_cap")]
    pub timeline_cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Media tool binary used for frame extraction
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,

    /// Capture a thumbnail on every K-th supervisor tick
    #[serde(default = "default_thumbnail_every_k")]
    pub every_k_ticks: u32,

    /// Thumbnails older than this are swept
    #[serde(
        with = "duration_serde::duration",
        default = "default_thumbnail_max_age"
    )]
    pub max_age: Duration,

    /// Sweep cadence for the thumbnail directory
    #[serde(
        with = "duration_serde::duration",
        default = "default_thumbnail_sweep_interval"
    )]
    pub sweep_interval: Duration,

    /// Per-invocation deadline for the media tool
    #[serde(
        with = "duration_serde::duration",
        default = "default_thumbnail_capture_timeout"
    )]
    pub capture_timeout: Duration,
}

impl Config {
    /// Load configuration from a TOML file merged with environment
    /// variables. A missing file falls back to defaults so the service can
    /// start with zero configuration.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("STREAMWATCH_").split("__"))
            .extract()?;
        Ok(config)
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}
fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}
fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}
fn default_window_short() -> Duration {
    DEFAULT_WINDOW_SHORT
}
fn default_window_long() -> Duration {
    DEFAULT_WINDOW_LONG
}
fn default_manifest_red_window() -> Duration {
    DEFAULT_MANIFEST_RED_WINDOW
}
fn default_ttfb_yellow_ms() -> f64 {
    DEFAULT_TTFB_YELLOW_MS
}
fn default_ratio_yellow() -> f64 {
    DEFAULT_RATIO_YELLOW
}
fn default_red_consecutive_errors() -> usize {
    DEFAULT_RED_CONSECUTIVE_ERRORS
}
fn default_red_err_rate() -> f64 {
    DEFAULT_RED_ERR_RATE
}
fn default_yellow_persistence() -> Duration {
    DEFAULT_YELLOW_PERSISTENCE
}
fn default_resolve_hold() -> Duration {
    DEFAULT_RESOLVE_HOLD
}
fn default_flap_window() -> Duration {
    DEFAULT_FLAP_WINDOW
}
fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}
fn default_history_retention() -> usize {
    DEFAULT_HISTORY_RETENTION
}
fn default_timeline_cap() -> usize {
    DEFAULT_TIMELINE_CAP
}
fn default_ffmpeg_command() -> String {
    DEFAULT_FFMPEG_COMMAND.to_string()
}
fn default_thumbnail_every_k() -> u32 {
    DEFAULT_THUMBNAIL_EVERY_K
}
fn default_thumbnail_max_age() -> Duration {
    DEFAULT_THUMBNAIL_MAX_AGE
}
fn default_thumbnail_sweep_interval() -> Duration {
    DEFAULT_THUMBNAIL_SWEEP_INTERVAL
}
fn default_thumbnail_capture_timeout() -> Duration {
    DEFAULT_THUMBNAIL_CAPTURE_TIMEOUT
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            probe_timeout: default_probe_timeout(),
            window_short: default_window_short(),
            window_long: default_window_long(),
            manifest_red_window: default_manifest_red_window(),
            ttfb_yellow_ms: default_ttfb_yellow_ms(),
            ratio_yellow: default_ratio_yellow(),
            red_consecutive_errors: default_red_consecutive_errors(),
            red_err_rate: default_red_err_rate(),
            yellow_persistence: default_yellow_persistence(),
            resolve_hold: default_resolve_hold(),
            flap_window: default_flap_window(),
            shutdown_grace: default_shutdown_grace(),
            history_retention: default_history_retention(),
            timeline_cap: default_timeline_cap(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            ffmpeg_command: default_ffmpeg_command(),
            every_k_ticks: default_thumbnail_every_k(),
            max_age: default_thumbnail_max_age(),
            sweep_interval: default_thumbnail_sweep_interval(),
            capture_timeout: default_thumbnail_capture_timeout(),
        }
    }
}
