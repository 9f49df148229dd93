//! Per-stream supervision
//!
//! One supervisor task per stream drives the whole pipeline: probe the
//! manifest, parse it, pick a segment, probe that, evaluate health,
//! forward transitions and outcomes to the incident manager, and publish
//! everything on the fan-out channel. Probe failures are data; the only
//! faults a supervisor can suffer are internal panics, which restart the
//! loop with exponential backoff and surface as a RED snapshot.

use chrono::Utc;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::health::{evaluate, HealthTracker};
use crate::hls::{self, MediaPlaylist, Playlist, Segment};
use crate::incidents::{IncidentManager, IncidentSignal};
use crate::metrics::MetricStore;
use crate::models::{
    HealthSnapshot, HealthState, HealthTransitionRecord, MetricSample, ProbeKind, ProbeOutcome,
    Stream, StreamEvent, StreamEventKind, SupervisorState, WindowStats,
};
use crate::probe::Prober;
use crate::thumbnails::ThumbnailService;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Shared dependencies handed to every supervisor
#[derive(Clone)]
pub struct SupervisorContext {
    pub config: Arc<Config>,
    pub store: Arc<MetricStore>,
    pub incidents: Arc<IncidentManager>,
    pub prober: Prober,
    pub thumbnails: Option<Arc<ThumbnailService>>,
    pub events: broadcast::Sender<StreamEvent>,
}

/// Registry-side handle to a running supervisor
pub struct StreamHandle {
    pub stream: Stream,
    token: CancellationToken,
    state_rx: watch::Receiver<SupervisorState>,
    health_rx: watch::Receiver<Option<HealthSnapshot>>,
    join: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    pub fn health(&self) -> Option<HealthSnapshot> {
        self.health_rx.borrow().clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait until the supervisor reports STOPPED.
    pub async fn wait_stopped(&mut self) {
        while *self.state_rx.borrow() != SupervisorState::Stopped {
            if self.state_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Last-resort teardown after the stop grace period elapses.
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Spawn the supervision task for a stream.
pub fn spawn(stream: Stream, ctx: SupervisorContext) -> StreamHandle {
    let token = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(SupervisorState::Init);
    let (health_tx, health_rx) = watch::channel(None);

    let join = tokio::spawn(run_with_restarts(
        stream.clone(),
        ctx,
        token.clone(),
        state_tx,
        health_tx,
    ));

    StreamHandle {
        stream,
        token,
        state_rx,
        health_rx,
        join,
    }
}

/// Outer runner: restarts a panicked supervisor loop with exponential
/// backoff and reports the fault as a RED snapshot.
async fn run_with_restarts(
    stream: Stream,
    ctx: SupervisorContext,
    token: CancellationToken,
    state_tx: watch::Sender<SupervisorState>,
    health_tx: watch::Sender<Option<HealthSnapshot>>,
) {
    let mut backoff = BACKOFF_INITIAL;

    loop {
        let supervisor = Supervisor::new(
            stream.clone(),
            ctx.clone(),
            token.clone(),
            state_tx.clone(),
            health_tx.clone(),
        );

        match AssertUnwindSafe(supervisor.run()).catch_unwind().await {
            Ok(()) => break,
            Err(_) => {
                error!(
                    "Supervisor for stream {} panicked; restarting in {:?}",
                    stream.id, backoff
                );
                let previous = health_tx
                    .borrow()
                    .as_ref()
                    .map(|h| h.state)
                    .unwrap_or(HealthState::Green);
                let snapshot = HealthSnapshot {
                    state: HealthState::Red,
                    reason: "supervisor restart".to_string(),
                    updated_at: Utc::now(),
                    window: WindowStats {
                        sample_count: 0,
                        error_count: 0,
                        avg_ttfb_ms: None,
                        avg_download_ratio: None,
                    },
                };
                let _ = health_tx.send(Some(snapshot.clone()));
                let _ = ctx.events.send(StreamEvent {
                    stream_id: stream.id.clone(),
                    ts: snapshot.updated_at,
                    kind: StreamEventKind::HealthChanged {
                        state: HealthState::Red,
                        previous,
                        reason: snapshot.reason,
                    },
                });

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
        }

        if token.is_cancelled() {
            break;
        }
    }

    let _ = state_tx.send(SupervisorState::Stopped);
}

struct Supervisor {
    stream: Stream,
    ctx: SupervisorContext,
    token: CancellationToken,
    state_tx: watch::Sender<SupervisorState>,
    health_tx: watch::Sender<Option<HealthSnapshot>>,
    /// Manifest currently polled: the configured URL, or the chosen
    /// variant playlist once a master manifest redirected us
    playlist_url: String,
    seen_segments: HashSet<String>,
    last_ok_segment: Option<String>,
    tracker: HealthTracker,
    tick_count: u64,
}

impl Supervisor {
    fn new(
        stream: Stream,
        ctx: SupervisorContext,
        token: CancellationToken,
        state_tx: watch::Sender<SupervisorState>,
        health_tx: watch::Sender<Option<HealthSnapshot>>,
    ) -> Self {
        let flap_window = ctx.config.monitor.flap_window;
        let playlist_url = stream.manifest_url.clone();
        Self {
            stream,
            ctx,
            token,
            state_tx,
            health_tx,
            playlist_url,
            seen_segments: HashSet::new(),
            last_ok_segment: None,
            tracker: HealthTracker::new(flap_window),
            tick_count: 0,
        }
    }

    async fn run(mut self) {
        info!(
            "Supervisor started for stream {} ({})",
            self.stream.name, self.stream.id
        );

        loop {
            self.tick().await;

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.ctx.config.monitor.poll_interval) => {}
            }
        }

        let _ = self.state_tx.send(SupervisorState::Stopping);
        info!("Supervisor stopping for stream {}", self.stream.id);
    }

    async fn tick(&mut self) {
        self.tick_count += 1;
        let config = Arc::clone(&self.ctx.config);

        // 1. manifest probe; an unparseable body downgrades the ok outcome
        let (mut sample, body) = self
            .ctx
            .prober
            .probe(&self.playlist_url, ProbeKind::Manifest, None, &self.token)
            .await;
        if self.token.is_cancelled() {
            return;
        }

        let mut segment_request: Option<(String, f64)> = None;
        if sample.is_ok() {
            let body = body.unwrap_or_default();
            let text = String::from_utf8_lossy(&body);
            match hls::parse(&text, &self.playlist_url) {
                Ok(Playlist::Master(variants)) => {
                    // probe the top variant's playlist from the next tick on
                    if let Some(best) = variants.iter().max_by_key(|v| v.bandwidth) {
                        debug!(
                            "Stream {}: master manifest, following variant {} ({} bps)",
                            self.stream.id, best.uri, best.bandwidth
                        );
                        self.playlist_url = best.uri.clone();
                    }
                }
                Ok(Playlist::Media(playlist)) => {
                    self.prune_seen(&playlist);
                    segment_request = select_segment(&playlist, &self.seen_segments)
                        .map(|seg| (seg.uri.clone(), seg.duration_sec * 1000.0));
                }
                Err(e) => {
                    debug!("Stream {}: manifest parse failed: {e}", self.stream.id);
                    sample.outcome = ProbeOutcome::ParseError;
                }
            }
        }
        self.record_sample(sample).await;

        // 2. segment probe
        if let Some((url, declared_duration_ms)) = segment_request {
            let (sample, _) = self
                .ctx
                .prober
                .probe(
                    &url,
                    ProbeKind::Segment,
                    Some(declared_duration_ms),
                    &self.token,
                )
                .await;
            if self.token.is_cancelled() {
                return;
            }
            self.seen_segments.insert(url.clone());
            if sample.is_ok() {
                self.last_ok_segment = Some(url);
            }
            self.record_sample(sample).await;
        }

        // 3. evaluate the window and publish
        let now = Instant::now();
        let window = self
            .ctx
            .store
            .window(&self.stream.id, now, config.monitor.window_short)
            .await;
        let snapshot = evaluate(&window, now, Utc::now(), &config.monitor);
        let _ = self.health_tx.send(Some(snapshot.clone()));

        let transition = self.tracker.observe(&snapshot, now);
        if let Some(transition) = &transition {
            self.ctx
                .store
                .record_transition(
                    &self.stream.id,
                    HealthTransitionRecord {
                        at: transition.at,
                        mono: transition.mono,
                        from: transition.from,
                        to: transition.to,
                    },
                )
                .await;
            let _ = self.ctx.events.send(StreamEvent {
                stream_id: self.stream.id.clone(),
                ts: transition.at,
                kind: StreamEventKind::HealthChanged {
                    state: transition.to,
                    previous: transition.from,
                    reason: transition.reason.clone(),
                },
            });
        }

        // 4. incident lifecycle
        let signals = self
            .ctx
            .incidents
            .on_health(&self.stream.id, &snapshot, transition.as_ref(), now)
            .await;
        for signal in signals {
            let kind = match signal {
                IncidentSignal::Opened(incident) => StreamEventKind::IncidentOpened {
                    incident_id: incident.id,
                    trigger_reason: incident.trigger_reason,
                },
                IncidentSignal::Resolved(incident) => StreamEventKind::IncidentResolved {
                    incident_id: incident.id,
                },
            };
            let _ = self.ctx.events.send(StreamEvent {
                stream_id: self.stream.id.clone(),
                ts: Utc::now(),
                kind,
            });
        }

        // 5. thumbnail cadence
        let every_k = config.thumbnails.every_k_ticks.max(1) as u64;
        if self.tick_count % every_k == 0 {
            if let (Some(thumbnails), Some(segment_url)) =
                (self.ctx.thumbnails.clone(), self.last_ok_segment.clone())
            {
                let incidents = self.ctx.incidents.clone();
                let stream_id = self.stream.id.clone();
                tokio::spawn(async move {
                    if let Some(url) = thumbnails.capture(&stream_id, &segment_url).await {
                        incidents.on_thumbnail(&stream_id, &url, Utc::now()).await;
                    }
                });
            }
        }
    }

    async fn record_sample(&self, sample: MetricSample) {
        self.ctx.store.append(&self.stream.id, sample.clone()).await;
        self.ctx.incidents.on_outcome(&self.stream.id, &sample).await;

        let is_init = *self.state_tx.borrow() == SupervisorState::Init;
        if is_init {
            let _ = self.state_tx.send(SupervisorState::Running);
        }

        let _ = self.ctx.events.send(StreamEvent {
            stream_id: self.stream.id.clone(),
            ts: sample.at,
            kind: StreamEventKind::SampleAppended((&sample).into()),
        });
    }

    /// Forget segments that fell off the playlist so the seen set stays
    /// bounded by the playlist length.
    fn prune_seen(&mut self, playlist: &MediaPlaylist) {
        let current: HashSet<&str> = playlist.segments.iter().map(|s| s.uri.as_str()).collect();
        self.seen_segments.retain(|u| current.contains(u.as_str()));
    }
}

/// Pick the second-most-recent segment not probed yet; the most recent
/// entry is often still being produced. A single-entry playlist offers
/// only that entry.
fn select_segment<'a>(playlist: &'a MediaPlaylist, seen: &HashSet<String>) -> Option<&'a Segment> {
    let segments = &playlist.segments;
    let candidates = if segments.len() >= 2 {
        &segments[..segments.len() - 1]
    } else {
        &segments[..]
    };
    candidates.iter().rev().find(|s| !seen.contains(&s.uri))
}
