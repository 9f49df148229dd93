//! Health evaluation
//!
//! Maps the recent sample window to {GREEN, YELLOW, RED} with a one-line
//! reason naming the rule and the numeric fact that fired it. Evaluation
//! is a pure function of (window, config); the only state lives in
//! [`HealthTracker`], which suppresses GREEN->YELLOW->GREEN flaps inside
//! the flap window.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::MonitorConfig;
use crate::models::{
    HealthSnapshot, HealthState, HealthTransition, MetricSample, ProbeKind, WindowStats,
};

/// Facts derived from an evaluation window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowView {
    pub sample_count: usize,
    pub error_count: usize,
    pub err_rate: f64,
    pub avg_ttfb_ms: Option<f64>,
    pub avg_download_ratio: Option<f64>,
    /// Length of the longest all-failed suffix
    pub consecutive_errors: usize,
    /// Manifest probes inside the recent sub-window
    pub recent_manifest_attempts: usize,
    pub recent_manifest_ok: bool,
}

impl WindowView {
    pub fn compute(samples: &[MetricSample], now: Instant, manifest_window: Duration) -> Self {
        let sample_count = samples.len();
        let error_count = samples.iter().filter(|s| !s.is_ok()).count();
        let err_rate = if sample_count > 0 {
            error_count as f64 / sample_count as f64
        } else {
            0.0
        };

        let ttfbs: Vec<f64> = samples
            .iter()
            .filter(|s| s.is_ok())
            .filter_map(|s| s.ttfb_ms)
            .collect();
        let avg_ttfb_ms = mean(&ttfbs);

        let ratios: Vec<f64> = samples.iter().filter_map(|s| s.download_ratio()).collect();
        let avg_download_ratio = mean(&ratios);

        let consecutive_errors = samples.iter().rev().take_while(|s| !s.is_ok()).count();

        let recent_manifests: Vec<&MetricSample> = samples
            .iter()
            .filter(|s| s.kind == ProbeKind::Manifest)
            .filter(|s| {
                s.mono <= now && now.saturating_duration_since(s.mono) < manifest_window
            })
            .collect();
        let recent_manifest_attempts = recent_manifests.len();
        let recent_manifest_ok = recent_manifests.iter().any(|s| s.is_ok());

        Self {
            sample_count,
            error_count,
            err_rate,
            avg_ttfb_ms,
            avg_download_ratio,
            consecutive_errors,
            recent_manifest_attempts,
            recent_manifest_ok,
        }
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            sample_count: self.sample_count,
            error_count: self.error_count,
            avg_ttfb_ms: self.avg_ttfb_ms,
            avg_download_ratio: self.avg_download_ratio,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Evaluate the window at wall time `at`. Rules apply top-to-bottom, first
/// match wins.
pub fn evaluate(
    samples: &[MetricSample],
    now: Instant,
    at: DateTime<Utc>,
    config: &MonitorConfig,
) -> HealthSnapshot {
    let view = WindowView::compute(samples, now, config.manifest_red_window);
    let window_s = config.window_short.as_secs();

    let (state, reason) = if view.recent_manifest_attempts >= 2 && !view.recent_manifest_ok {
        (
            HealthState::Red,
            format!(
                "Manifest failing: {} attempts without success in last {}s",
                view.recent_manifest_attempts,
                config.manifest_red_window.as_secs()
            ),
        )
    } else if view.consecutive_errors >= config.red_consecutive_errors {
        (
            HealthState::Red,
            format!("{} consecutive failed probes", view.consecutive_errors),
        )
    } else if view.err_rate >= config.red_err_rate {
        (
            HealthState::Red,
            format!(
                "Error rate {:.0}% over last {window_s}s exceeded {:.0}% threshold",
                view.err_rate * 100.0,
                config.red_err_rate * 100.0
            ),
        )
    } else if view
        .avg_ttfb_ms
        .is_some_and(|ttfb| ttfb > config.ttfb_yellow_ms)
    {
        let ttfb = view.avg_ttfb_ms.unwrap_or_default();
        (
            HealthState::Yellow,
            format!(
                "Avg TTFB {ttfb:.0} ms exceeded {:.0} ms threshold over last {window_s}s",
                config.ttfb_yellow_ms
            ),
        )
    } else if view
        .avg_download_ratio
        .is_some_and(|ratio| ratio > config.ratio_yellow)
    {
        let ratio = view.avg_download_ratio.unwrap_or_default();
        (
            HealthState::Yellow,
            format!(
                "Avg download ratio {ratio:.2} exceeded {:.2} threshold over last {window_s}s",
                config.ratio_yellow
            ),
        )
    } else if view.error_count > 0 {
        (
            HealthState::Yellow,
            format!(
                "{} failed probe(s) in last {window_s}s",
                view.error_count
            ),
        )
    } else if view.sample_count == 0 {
        (HealthState::Green, "No samples in window yet".to_string())
    } else {
        (
            HealthState::Green,
            format!(
                "Stream healthy: {} probes ok over last {window_s}s",
                view.sample_count
            ),
        )
    };

    HealthSnapshot {
        state,
        reason,
        updated_at: at,
        window: view.stats(),
    }
}

struct PendingYellow {
    since_mono: Instant,
    since_wall: DateTime<Utc>,
    reason: String,
}

/// Tracks the emitted health state for one stream and decides which
/// transitions are reported.
///
/// A GREEN->YELLOW flip is held back for the flap window: if GREEN returns
/// first, nothing is emitted; if YELLOW outlasts the window (or RED
/// strikes), the transition goes out stamped with the original onset so
/// downstream persistence timers measure from the true start.
pub struct HealthTracker {
    flap_window: Duration,
    emitted: HealthState,
    pending_yellow: Option<PendingYellow>,
}

impl HealthTracker {
    pub fn new(flap_window: Duration) -> Self {
        Self {
            flap_window,
            emitted: HealthState::Green,
            pending_yellow: None,
        }
    }

    pub fn emitted_state(&self) -> HealthState {
        self.emitted
    }

    pub fn observe(&mut self, snapshot: &HealthSnapshot, now: Instant) -> Option<HealthTransition> {
        match (self.emitted, snapshot.state) {
            (current, new) if current == new => {
                if new == HealthState::Green {
                    // flap collapsed; the deferred YELLOW never existed
                    self.pending_yellow = None;
                }
                None
            }
            (HealthState::Green, HealthState::Yellow) => {
                let Some(pending) = self.pending_yellow.as_ref() else {
                    self.pending_yellow = Some(PendingYellow {
                        since_mono: now,
                        since_wall: snapshot.updated_at,
                        reason: snapshot.reason.clone(),
                    });
                    return None;
                };
                if now.saturating_duration_since(pending.since_mono) < self.flap_window {
                    return None;
                }
                let pending = self.pending_yellow.take().expect("pending is present");
                self.emitted = HealthState::Yellow;
                Some(HealthTransition {
                    from: HealthState::Green,
                    to: HealthState::Yellow,
                    at: pending.since_wall,
                    mono: pending.since_mono,
                    reason: pending.reason,
                })
            }
            (current, new) => {
                self.pending_yellow = None;
                self.emitted = new;
                Some(HealthTransition {
                    from: current,
                    to: new,
                    at: snapshot.updated_at,
                    mono: now,
                    reason: snapshot.reason.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProbeOutcome;

    fn config() -> MonitorConfig {
        MonitorConfig::default()
    }

    fn sample(
        mono: Instant,
        kind: ProbeKind,
        outcome: ProbeOutcome,
        ttfb_ms: f64,
        total_ms: f64,
    ) -> MetricSample {
        MetricSample {
            at: Utc::now(),
            mono,
            kind,
            url: "http://example.com/x".to_string(),
            outcome,
            ttfb_ms: Some(ttfb_ms),
            total_ms,
            bytes: 100_000,
            declared_duration_ms: (kind == ProbeKind::Segment).then_some(6000.0),
        }
    }

    fn snapshot_for(samples: &[MetricSample], now: Instant) -> HealthSnapshot {
        evaluate(samples, now, Utc::now(), &config())
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_window_is_green() {
        let now = Instant::now();
        let samples: Vec<_> = (0..6)
            .map(|i| {
                let kind = if i % 2 == 0 {
                    ProbeKind::Manifest
                } else {
                    ProbeKind::Segment
                };
                sample(now, kind, ProbeOutcome::Ok, 120.0, 300.0)
            })
            .collect();

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Green);
        assert!(snapshot.reason.contains("ok"), "reason: {}", snapshot.reason);
        assert_eq!(snapshot.window.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_errors_force_red() {
        let now = Instant::now();
        let mut samples = vec![sample(now, ProbeKind::Segment, ProbeOutcome::Ok, 100.0, 300.0)];
        for _ in 0..3 {
            samples.push(sample(
                now,
                ProbeKind::Segment,
                ProbeOutcome::Timeout,
                0.0,
                5000.0,
            ));
        }

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Red);
        assert!(snapshot.reason.contains("3 consecutive"));
    }

    #[tokio::test(start_paused = true)]
    async fn err_rate_forces_red() {
        let now = Instant::now();
        // alternate ok/fail so no 3-error suffix forms, 50% error rate
        let mut samples = Vec::new();
        for i in 0..6 {
            let outcome = if i % 2 == 0 {
                ProbeOutcome::HttpError(500)
            } else {
                ProbeOutcome::Ok
            };
            samples.push(sample(now, ProbeKind::Segment, outcome, 100.0, 300.0));
        }

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Red);
        assert!(snapshot.reason.contains("Error rate 50%"));
    }

    #[tokio::test(start_paused = true)]
    async fn error_rate_forces_red_even_in_a_small_window() {
        let now = Instant::now();
        // two failed segment probes: consecutive_errors is below its
        // threshold, but the 100% error rate alone forces RED
        let samples = vec![
            sample(now, ProbeKind::Segment, ProbeOutcome::Timeout, 0.0, 5000.0),
            sample(now, ProbeKind::Segment, ProbeOutcome::Timeout, 0.0, 5000.0),
        ];

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Red);
        assert!(snapshot.reason.contains("Error rate 100%"));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_manifest_forces_red() {
        let now = Instant::now();
        let samples = vec![
            sample(now, ProbeKind::Manifest, ProbeOutcome::HttpError(503), 40.0, 45.0),
            sample(now, ProbeKind::Manifest, ProbeOutcome::HttpError(503), 40.0, 45.0),
        ];

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Red);
        assert!(snapshot.reason.contains("Manifest failing"));
    }

    #[tokio::test(start_paused = true)]
    async fn old_manifest_failures_do_not_trip_the_recent_rule() {
        let old = Instant::now();
        let now = old + Duration::from_secs(60);
        let samples = vec![
            sample(old, ProbeKind::Manifest, ProbeOutcome::HttpError(503), 40.0, 45.0),
            sample(old, ProbeKind::Manifest, ProbeOutcome::HttpError(503), 40.0, 45.0),
            sample(now, ProbeKind::Manifest, ProbeOutcome::Ok, 100.0, 200.0),
            sample(now, ProbeKind::Segment, ProbeOutcome::Ok, 100.0, 300.0),
            sample(now, ProbeKind::Segment, ProbeOutcome::Ok, 100.0, 300.0),
            sample(now, ProbeKind::Segment, ProbeOutcome::Ok, 100.0, 300.0),
        ];

        // the failures are outside the 30s manifest sub-window and the
        // error rate sits below the RED threshold
        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Yellow);
        assert!(snapshot.reason.contains("2 failed probe"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ttfb_is_yellow_with_numeric_reason() {
        let now = Instant::now();
        let samples: Vec<_> = (0..4)
            .map(|_| sample(now, ProbeKind::Segment, ProbeOutcome::Ok, 720.0, 900.0))
            .collect();

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Yellow);
        assert!(snapshot.reason.contains("720"), "reason: {}", snapshot.reason);
        assert!(snapshot.reason.contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_downloads_are_yellow() {
        let now = Instant::now();
        // 6s segments downloading in 5.7s: ratio 0.95 > 0.9
        let samples: Vec<_> = (0..4)
            .map(|_| sample(now, ProbeKind::Segment, ProbeOutcome::Ok, 100.0, 5700.0))
            .collect();

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Yellow);
        assert!(snapshot.reason.contains("0.95"));
    }

    #[tokio::test(start_paused = true)]
    async fn sporadic_errors_are_yellow() {
        let now = Instant::now();
        let mut samples: Vec<_> = (0..5)
            .map(|_| sample(now, ProbeKind::Segment, ProbeOutcome::Ok, 100.0, 300.0))
            .collect();
        samples.insert(
            2,
            sample(now, ProbeKind::Segment, ProbeOutcome::HttpError(404), 0.0, 50.0),
        );

        let snapshot = snapshot_for(&samples, now);
        assert_eq!(snapshot.state, HealthState::Yellow);
        assert!(snapshot.reason.contains("1 failed probe"));
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_reports_red_immediately() {
        let now = Instant::now();
        let mut tracker = HealthTracker::new(Duration::from_secs(30));
        let red = HealthSnapshot {
            state: HealthState::Red,
            reason: "3 consecutive failed probes".to_string(),
            updated_at: Utc::now(),
            window: WindowStats {
                sample_count: 3,
                error_count: 3,
                avg_ttfb_ms: None,
                avg_download_ratio: None,
            },
        };

        let transition = tracker.observe(&red, now).expect("transition expected");
        assert_eq!(transition.from, HealthState::Green);
        assert_eq!(transition.to, HealthState::Red);
        assert_eq!(tracker.emitted_state(), HealthState::Red);
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_collapses_short_yellow_flap() {
        let now = Instant::now();
        let mut tracker = HealthTracker::new(Duration::from_secs(30));
        let yellow = HealthSnapshot {
            state: HealthState::Yellow,
            reason: "Avg TTFB 700 ms exceeded 500 ms threshold over last 120s".to_string(),
            updated_at: Utc::now(),
            window: WindowStats {
                sample_count: 5,
                error_count: 0,
                avg_ttfb_ms: Some(700.0),
                avg_download_ratio: None,
            },
        };
        let green = HealthSnapshot {
            state: HealthState::Green,
            reason: "Stream healthy: 5 probes ok over last 120s".to_string(),
            updated_at: Utc::now(),
            window: WindowStats {
                sample_count: 5,
                error_count: 0,
                avg_ttfb_ms: Some(120.0),
                avg_download_ratio: None,
            },
        };

        assert!(tracker.observe(&yellow, now).is_none());
        assert!(tracker
            .observe(&yellow, now + Duration::from_secs(10))
            .is_none());
        // back to green inside the flap window: no transition ever emitted
        assert!(tracker
            .observe(&green, now + Duration::from_secs(20))
            .is_none());
        assert_eq!(tracker.emitted_state(), HealthState::Green);
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_emits_persistent_yellow_with_onset_timestamp() {
        let now = Instant::now();
        let mut tracker = HealthTracker::new(Duration::from_secs(30));
        let onset_wall = Utc::now();
        let yellow = HealthSnapshot {
            state: HealthState::Yellow,
            reason: "Avg TTFB 700 ms exceeded 500 ms threshold over last 120s".to_string(),
            updated_at: onset_wall,
            window: WindowStats {
                sample_count: 5,
                error_count: 0,
                avg_ttfb_ms: Some(700.0),
                avg_download_ratio: None,
            },
        };

        assert!(tracker.observe(&yellow, now).is_none());
        let transition = tracker
            .observe(&yellow, now + Duration::from_secs(30))
            .expect("transition after flap window");
        assert_eq!(transition.to, HealthState::Yellow);
        assert_eq!(transition.mono, now);
        assert_eq!(transition.at, onset_wall);
    }
}
