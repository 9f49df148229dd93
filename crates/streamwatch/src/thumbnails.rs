//! Thumbnail capture via an external media tool
//!
//! Frame extraction is delegated to the configured ffmpeg binary invoked
//! with (segment URL, output path). Everything here is best-effort: a
//! missing tool is detected once at startup and logged, failed captures
//! are silent, and a single maintenance task sweeps old files from the
//! thumbnail directory.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ThumbnailConfig;

pub struct ThumbnailService {
    command: String,
    dir: PathBuf,
    capture_timeout: Duration,
    available: bool,
    latest: RwLock<HashMap<String, String>>,
}

impl ThumbnailService {
    /// Prepare the thumbnail directory and check the media tool once. A
    /// missing tool disables capture for the process lifetime.
    pub async fn new(config: &ThumbnailConfig, dir: PathBuf) -> Self {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Cannot create thumbnail directory {}: {e}", dir.display());
        }

        let available = Command::new(&config.ffmpeg_command)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        if available {
            info!("Thumbnail tool available: {}", config.ffmpeg_command);
        } else {
            warn!(
                "Thumbnail tool '{}' not available; thumbnails disabled",
                config.ffmpeg_command
            );
        }

        Self {
            command: config.ffmpeg_command.clone(),
            dir,
            capture_timeout: config.capture_timeout,
            available,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Extract one frame from `segment_url`. Returns the public URL of the
    /// written file; failures are logged at debug and otherwise silent.
    pub async fn capture(&self, stream_id: &str, segment_url: &str) -> Option<String> {
        if !self.available {
            return None;
        }

        let filename = format!("{stream_id}_{}.jpg", Utc::now().timestamp());
        let output_path = self.dir.join(&filename);

        let mut cmd = Command::new(&self.command);
        cmd.args([
            "-y",
            "-v",
            "error",
            "-i",
            segment_url,
            "-frames:v",
            "1",
            "-vf",
            "scale=320:-1",
        ]);
        cmd.arg(&output_path);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let status = match tokio::time::timeout(self.capture_timeout, cmd.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                debug!("Thumbnail capture failed to launch for {stream_id}: {e}");
                return None;
            }
            Err(_) => {
                debug!("Thumbnail capture timed out for {stream_id}");
                return None;
            }
        };
        if !status.success() {
            debug!("Thumbnail capture exited non-zero for {stream_id}");
            return None;
        }

        let url = format!("/thumbnails/{filename}");
        self.latest
            .write()
            .await
            .insert(stream_id.to_string(), url.clone());
        Some(url)
    }

    pub async fn latest(&self, stream_id: &str) -> Option<String> {
        self.latest.read().await.get(stream_id).cloned()
    }

    pub fn directory(&self) -> &PathBuf {
        &self.dir
    }

    /// Drop the latest-thumbnail pointer and remove this stream's files.
    pub async fn remove_stream(&self, stream_id: &str) {
        self.latest.write().await.remove(stream_id);

        let prefix = format!("{stream_id}_");
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&prefix)
            {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }

    /// Single maintenance task: age-based sweep of the thumbnail
    /// directory.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
        token: CancellationToken,
    ) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                service.sweep(max_age).await;
            }
        });
    }

    async fn sweep(&self, max_age: Duration) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return;
        };
        let mut removed = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            if age.map(|a| a > max_age).unwrap_or(false)
                && tokio::fs::remove_file(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Thumbnail sweep removed {removed} file(s)");
        }
    }
}
