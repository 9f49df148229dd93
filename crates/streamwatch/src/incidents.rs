//! Incident lifecycle management
//!
//! The incident manager is the only component permitted to mutate
//! incident state. It consumes health evaluations and probe outcomes per
//! stream and enforces the lifecycle policies: open on RED (or sustained
//! YELLOW), at most one active incident per stream, idempotent
//! acknowledgement, resolution only after a sustained GREEN hold, and
//! bounded retention of resolved incidents and timeline events.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    HealthSnapshot, HealthState, HealthTransition, Incident, IncidentFilter, IncidentStatus,
    MetricSample, ProbeKind, TimelineEvent, TimelineEventKind,
};

/// Lifecycle notification for the fan-out channel
#[derive(Debug, Clone)]
pub enum IncidentSignal {
    Opened(Incident),
    Resolved(Incident),
}

#[derive(Default)]
struct StreamIncidents {
    active: Option<Incident>,
    resolved: VecDeque<Incident>,
    next_event_id: u64,
    yellow_since: Option<Instant>,
    green_since: Option<Instant>,
}

impl StreamIncidents {
    fn next_event_id(&mut self) -> u64 {
        self.next_event_id += 1;
        self.next_event_id
    }

    /// Append to the active incident's timeline, dropping the oldest
    /// post-opening event once the cap is reached. The opening event and
    /// the latest event always survive.
    fn push_event(
        &mut self,
        cap: usize,
        at: DateTime<Utc>,
        kind: TimelineEventKind,
        message: String,
        attributes: HashMap<String, serde_json::Value>,
    ) {
        let id = self.next_event_id();
        let Some(incident) = self.active.as_mut() else {
            return;
        };
        incident.timeline.push(TimelineEvent {
            id,
            at,
            kind,
            message,
            attributes,
        });
        while incident.timeline.len() > cap.max(2) {
            incident.timeline.remove(1);
        }
    }
}

pub struct IncidentManager {
    yellow_persistence: Duration,
    resolve_hold: Duration,
    history_retention: usize,
    timeline_cap: usize,
    inner: RwLock<HashMap<String, StreamIncidents>>,
}

impl IncidentManager {
    pub fn new(monitor: &MonitorConfig) -> Self {
        Self {
            yellow_persistence: monitor.yellow_persistence,
            resolve_hold: monitor.resolve_hold,
            history_retention: monitor.history_retention,
            timeline_cap: monitor.timeline_cap,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Feed one health evaluation. Returns the lifecycle signals (opened /
    /// resolved) this evaluation produced.
    pub async fn on_health(
        &self,
        stream_id: &str,
        snapshot: &HealthSnapshot,
        transition: Option<&HealthTransition>,
        now: Instant,
    ) -> Vec<IncidentSignal> {
        let mut signals = Vec::new();
        let mut inner = self.inner.write().await;
        let entry = inner.entry(stream_id.to_string()).or_default();

        if let Some(transition) = transition {
            let mut attributes = HashMap::new();
            attributes.insert(
                "from".to_string(),
                serde_json::to_value(transition.from).unwrap_or_default(),
            );
            attributes.insert(
                "to".to_string(),
                serde_json::to_value(transition.to).unwrap_or_default(),
            );
            entry.push_event(
                self.timeline_cap,
                transition.at,
                TimelineEventKind::HealthTransition,
                format!(
                    "Health changed from {} to {}: {}",
                    transition.from, transition.to, transition.reason
                ),
                attributes,
            );
        }

        match snapshot.state {
            HealthState::Red => {
                entry.yellow_since = None;
                entry.green_since = None;
                let became_red = transition.map(|t| t.to == HealthState::Red).unwrap_or(false);
                if entry.active.is_none() && became_red {
                    let from = transition.map(|t| t.from).unwrap_or(HealthState::Green);
                    let trigger =
                        format!("Health degraded from {from} to RED: {}", snapshot.reason);
                    let incident = self.open_incident(entry, stream_id, trigger, snapshot);
                    signals.push(IncidentSignal::Opened(incident));
                }
            }
            HealthState::Yellow => {
                entry.green_since = None;
                let since = *entry.yellow_since.get_or_insert(now);
                if entry.active.is_none()
                    && now.saturating_duration_since(since) >= self.yellow_persistence
                {
                    let trigger = format!(
                        "Stream degraded (YELLOW) for over {}s: {}",
                        self.yellow_persistence.as_secs(),
                        snapshot.reason
                    );
                    let incident = self.open_incident(entry, stream_id, trigger, snapshot);
                    signals.push(IncidentSignal::Opened(incident));
                }
            }
            HealthState::Green => {
                entry.yellow_since = None;
                if entry.active.is_some() {
                    let since = *entry.green_since.get_or_insert(now);
                    if now.saturating_duration_since(since) >= self.resolve_hold {
                        entry.green_since = None;
                        if let Some(resolved) = self.resolve_active(entry, snapshot.updated_at) {
                            signals.push(IncidentSignal::Resolved(resolved));
                        }
                    }
                } else {
                    entry.green_since = None;
                }
            }
        }

        signals
    }

    fn open_incident(
        &self,
        entry: &mut StreamIncidents,
        stream_id: &str,
        trigger_reason: String,
        snapshot: &HealthSnapshot,
    ) -> Incident {
        let id = format!("INC-{}", &Uuid::new_v4().simple().to_string()[..8]);
        info!("Opening incident {id} for stream {stream_id}: {trigger_reason}");

        let mut attributes = HashMap::new();
        attributes.insert(
            "window".to_string(),
            serde_json::to_value(&snapshot.window).unwrap_or_default(),
        );
        attributes.insert(
            "health_reason".to_string(),
            serde_json::Value::String(snapshot.reason.clone()),
        );

        entry.active = Some(Incident {
            id,
            stream_id: stream_id.to_string(),
            status: IncidentStatus::Open,
            trigger_reason: trigger_reason.clone(),
            opened_at: snapshot.updated_at,
            acknowledged_at: None,
            resolved_at: None,
            timeline: Vec::new(),
        });
        entry.push_event(
            self.timeline_cap,
            snapshot.updated_at,
            TimelineEventKind::IncidentOpened,
            trigger_reason,
            attributes,
        );

        entry.active.clone().expect("incident was just opened")
    }

    fn resolve_active(&self, entry: &mut StreamIncidents, at: DateTime<Utc>) -> Option<Incident> {
        {
            let incident = entry.active.as_mut()?;
            incident.status = IncidentStatus::Resolved;
            incident.resolved_at = Some(at);
        }
        entry.push_event(
            self.timeline_cap,
            at,
            TimelineEventKind::IncidentResolved,
            "Health returned to GREEN and held".to_string(),
            HashMap::new(),
        );

        let incident = entry.active.take().expect("active incident being resolved");
        info!(
            "Resolved incident {} for stream {}",
            incident.id, incident.stream_id
        );
        entry.resolved.push_back(incident.clone());
        while entry.resolved.len() > self.history_retention {
            entry.resolved.pop_front();
        }
        Some(incident)
    }

    /// Record a probe outcome on the active incident's timeline, if one
    /// exists.
    pub async fn on_outcome(&self, stream_id: &str, sample: &MetricSample) {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.get_mut(stream_id) else {
            return;
        };
        if entry.active.is_none() {
            return;
        }

        let (kind, message) = match (sample.kind, sample.is_ok()) {
            (ProbeKind::Manifest, true) => return, // routine, not diagnostic
            (ProbeKind::Manifest, false) => (
                TimelineEventKind::ManifestFail,
                format!("Manifest probe failed: {} ({})", sample.outcome, sample.url),
            ),
            (ProbeKind::Segment, true) => (
                TimelineEventKind::SegmentOk,
                format!(
                    "Segment ok in {:.0}ms ({} bytes)",
                    sample.total_ms, sample.bytes
                ),
            ),
            (ProbeKind::Segment, false) => (
                TimelineEventKind::SegmentFail,
                format!("Segment probe failed: {} ({})", sample.outcome, sample.url),
            ),
        };

        let mut attributes = HashMap::new();
        attributes.insert(
            "outcome".to_string(),
            serde_json::to_value(&sample.outcome).unwrap_or_default(),
        );
        entry.push_event(self.timeline_cap, sample.at, kind, message, attributes);
    }

    /// Record a captured thumbnail on the active incident's timeline.
    pub async fn on_thumbnail(&self, stream_id: &str, thumbnail_url: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.get_mut(stream_id) else {
            return;
        };
        if entry.active.is_none() {
            return;
        }
        let mut attributes = HashMap::new();
        attributes.insert(
            "thumbnail_url".to_string(),
            serde_json::Value::String(thumbnail_url.to_string()),
        );
        entry.push_event(
            self.timeline_cap,
            at,
            TimelineEventKind::ThumbnailCaptured,
            "Thumbnail captured".to_string(),
            attributes,
        );
    }

    /// Acknowledge an incident. Idempotent: acknowledging twice (or after
    /// resolution) leaves the record unchanged. Returns the incident and
    /// whether this call changed it.
    pub async fn acknowledge(&self, incident_id: &str) -> AppResult<(Incident, bool)> {
        let mut inner = self.inner.write().await;

        for (stream_id, entry) in inner.iter_mut() {
            let is_match = entry
                .active
                .as_ref()
                .map(|i| i.id == incident_id)
                .unwrap_or(false);
            if is_match {
                let stream_id = stream_id.clone();
                let newly = {
                    let incident = entry.active.as_mut().expect("matched above");
                    if incident.status == IncidentStatus::Open {
                        incident.status = IncidentStatus::Acknowledged;
                        incident.acknowledged_at = Some(Utc::now());
                        true
                    } else {
                        false
                    }
                };
                if newly {
                    entry.push_event(
                        self.timeline_cap,
                        Utc::now(),
                        TimelineEventKind::IncidentAcknowledged,
                        "Incident acknowledged by operator".to_string(),
                        HashMap::new(),
                    );
                    info!("Incident {incident_id} on stream {stream_id} acknowledged");
                }
                let incident = entry.active.clone().expect("matched above");
                return Ok((incident, newly));
            }

            if let Some(resolved) = entry.resolved.iter().find(|i| i.id == incident_id) {
                return Ok((resolved.clone(), false));
            }
        }

        Err(AppError::not_found("incident", incident_id))
    }

    pub async fn active_incident(&self, stream_id: &str) -> Option<Incident> {
        self.inner
            .read()
            .await
            .get(stream_id)
            .and_then(|e| e.active.clone())
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|e| e.active.is_some())
            .count()
    }

    pub async fn list(&self, filter: &IncidentFilter) -> Vec<Incident> {
        let inner = self.inner.read().await;
        let mut incidents: Vec<Incident> = inner
            .iter()
            .filter(|(stream_id, _)| {
                filter
                    .stream_id
                    .as_ref()
                    .map(|want| want == *stream_id)
                    .unwrap_or(true)
            })
            .flat_map(|(_, entry)| {
                let mut all: Vec<Incident> = entry.active.clone().into_iter().collect();
                if !filter.active_only {
                    all.extend(entry.resolved.iter().cloned());
                }
                all
            })
            .collect();
        incidents.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        incidents
    }

    /// Flat view of the most recent timeline events for a stream, across
    /// the active incident and retained history, in chronological order.
    pub async fn timeline(&self, stream_id: &str, limit: usize) -> Vec<TimelineEvent> {
        let inner = self.inner.read().await;
        let Some(entry) = inner.get(stream_id) else {
            return Vec::new();
        };
        let mut events: Vec<TimelineEvent> = entry
            .resolved
            .iter()
            .flat_map(|i| i.timeline.iter().cloned())
            .chain(
                entry
                    .active
                    .iter()
                    .flat_map(|i| i.timeline.iter().cloned()),
            )
            .collect();
        events.sort_by(|a, b| a.at.cmp(&b.at).then(a.id.cmp(&b.id)));
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        events
    }

    pub async fn remove_stream(&self, stream_id: &str) {
        self.inner.write().await.remove(stream_id);
    }
}
