//! Configuration default values
//!
//! This module contains all the default values for configuration options,
//! making them easily changeable in one central location.

use std::time::Duration;

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

// Storage defaults
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_STREAMS_FILE: &str = "streams.json";
pub const DEFAULT_THUMBNAILS_DIR: &str = "thumbnails";

// Monitoring defaults
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WINDOW_SHORT: Duration = Duration::from_secs(120);
pub const DEFAULT_WINDOW_LONG: Duration = Duration::from_secs(3600);
pub const DEFAULT_MANIFEST_RED_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_TTFB_YELLOW_MS: f64 = 500.0;
pub const DEFAULT_RATIO_YELLOW: f64 = 0.9;
pub const DEFAULT_RED_CONSECUTIVE_ERRORS: usize = 3;
pub const DEFAULT_RED_ERR_RATE: f64 = 0.5;
pub const DEFAULT_YELLOW_PERSISTENCE: Duration = Duration::from_secs(60);
pub const DEFAULT_RESOLVE_HOLD: Duration = Duration::from_secs(30);
pub const DEFAULT_FLAP_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// Incident bookkeeping defaults
pub const DEFAULT_HISTORY_RETENTION: usize = 50;
pub const DEFAULT_TIMELINE_CAP: usize = 500;

// Thumbnail defaults
pub const DEFAULT_FFMPEG_COMMAND: &str = "ffmpeg";
pub const DEFAULT_THUMBNAIL_EVERY_K: u32 = 3;
pub const DEFAULT_THUMBNAIL_MAX_AGE: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_THUMBNAIL_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_THUMBNAIL_CAPTURE_TIMEOUT: Duration = Duration::from_secs(15);
