#![allow(dead_code)]
//! Shared test fixtures: a scripted fake origin and config helpers.
//!
//! Scenario tests run under the paused tokio clock, so everything here is
//! driven by virtual time: latencies are reported in the fetch result
//! rather than slept, and the origin's playlist advances by one segment
//! per manifest fetch like a live encoder would.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use streamwatch::config::Config;
use streamwatch::models::ProbeOutcome;
use streamwatch::probe::{FetchResult, ProbeTransport};

pub const MANIFEST_URL: &str = "http://origin.test/live/stream.m3u8";

/// How the scripted origin behaves right now; switchable mid-test.
#[derive(Debug, Clone)]
pub enum OriginMode {
    /// Manifest and segments respond with the given timings
    Healthy { ttfb_ms: u64, total_ms: u64 },
    /// Every manifest fetch fails with this status
    ManifestError(u16),
    /// Manifest is fine, every segment fetch fails with this status
    SegmentError(u16),
}

pub struct ScriptedOrigin {
    mode: Mutex<OriginMode>,
    manifest_fetches: AtomicU64,
}

impl ScriptedOrigin {
    pub fn healthy() -> Self {
        Self::new(OriginMode::Healthy {
            ttfb_ms: 120,
            total_ms: 300,
        })
    }

    pub fn new(mode: OriginMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            manifest_fetches: AtomicU64::new(0),
        }
    }

    pub fn set_mode(&self, mode: OriginMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Live playlist: a rolling window of five 6-second segments that
    /// advances one segment per fetch.
    fn playlist(&self, fetch_index: u64) -> String {
        let mut body = format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:{fetch_index}\n"
        );
        for seq in fetch_index..fetch_index + 5 {
            body.push_str(&format!("#EXTINF:6.0,\nseg{seq}.ts\n"));
        }
        body
    }

    fn ok(ttfb_ms: u64, total_ms: u64, body: Option<Vec<u8>>) -> FetchResult {
        let bytes = body.as_ref().map(|b| b.len() as u64).unwrap_or(500_000);
        FetchResult {
            outcome: ProbeOutcome::Ok,
            ttfb: Some(Duration::from_millis(ttfb_ms)),
            total: Duration::from_millis(total_ms),
            bytes,
            body,
        }
    }

    fn http_error(code: u16) -> FetchResult {
        FetchResult {
            outcome: ProbeOutcome::HttpError(code),
            ttfb: Some(Duration::from_millis(40)),
            total: Duration::from_millis(45),
            bytes: 0,
            body: None,
        }
    }
}

#[async_trait]
impl ProbeTransport for ScriptedOrigin {
    async fn fetch(
        &self,
        url: &str,
        _timeout: Duration,
        collect_body: bool,
        _cancel: &CancellationToken,
    ) -> FetchResult {
        let mode = self.mode.lock().unwrap().clone();
        let is_manifest = url.ends_with(".m3u8");

        if is_manifest {
            match mode {
                OriginMode::Healthy { ttfb_ms, total_ms } => {
                    let n = self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
                    let body = collect_body.then(|| self.playlist(n).into_bytes());
                    Self::ok(ttfb_ms, total_ms, body)
                }
                OriginMode::ManifestError(code) => Self::http_error(code),
                OriginMode::SegmentError(_) => {
                    let n = self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
                    let body = collect_body.then(|| self.playlist(n).into_bytes());
                    Self::ok(80, 120, body)
                }
            }
        } else {
            match mode {
                OriginMode::Healthy { ttfb_ms, total_ms } => Self::ok(ttfb_ms, total_ms, None),
                OriginMode::ManifestError(code) => Self::http_error(code),
                OriginMode::SegmentError(code) => Self::http_error(code),
            }
        }
    }
}

/// A transport that never answers until its deadline or cancellation.
pub struct HungTransport;

#[async_trait]
impl ProbeTransport for HungTransport {
    async fn fetch(
        &self,
        _url: &str,
        timeout: Duration,
        _collect_body: bool,
        cancel: &CancellationToken,
    ) -> FetchResult {
        tokio::select! {
            _ = cancel.cancelled() => FetchResult {
                outcome: ProbeOutcome::Other,
                ttfb: None,
                total: Duration::ZERO,
                bytes: 0,
                body: None,
            },
            _ = tokio::time::sleep(timeout) => FetchResult {
                outcome: ProbeOutcome::Timeout,
                ttfb: None,
                total: timeout,
                bytes: 0,
                body: None,
            },
        }
    }
}

/// Default config pointed at a throwaway data directory.
pub fn test_config(data_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.path().to_path_buf();
    config
}
