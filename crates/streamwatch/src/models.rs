//! Core data model for the observation and incident pipeline
//!
//! Every wire-visible type lives here: stream configuration, metric
//! samples, health snapshots, incidents with their timelines, root-cause
//! classifications, and the fan-out event envelope. Enumerations are
//! tagged variants; the only free-form strings are human-readable reasons
//! and evidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;

/// Stream configuration. Immutable after creation except for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub name: String,
    pub manifest_url: String,
    pub created_at: DateTime<Utc>,
}

/// What a probe request targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Manifest,
    Segment,
}

/// How a probe request concluded. Everything that is not `Ok` is a
/// failure observation, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Ok,
    HttpError(u16),
    Timeout,
    Dns,
    Connect,
    ParseError,
    Other,
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Ok => write!(f, "ok"),
            ProbeOutcome::HttpError(code) => write!(f, "http {code}"),
            ProbeOutcome::Timeout => write!(f, "timeout"),
            ProbeOutcome::Dns => write!(f, "dns failure"),
            ProbeOutcome::Connect => write!(f, "connect failure"),
            ProbeOutcome::ParseError => write!(f, "parse error"),
            ProbeOutcome::Other => write!(f, "transport error"),
        }
    }
}

/// One observation of one HTTP request.
///
/// `mono` carries the monotonic ordering used by window queries; `at` is
/// the wall-clock timestamp used for display and history bucketing.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub mono: Instant,
    pub kind: ProbeKind,
    pub url: String,
    pub outcome: ProbeOutcome,
    /// Milliseconds to the first response byte; present only if a
    /// response started
    pub ttfb_ms: Option<f64>,
    pub total_ms: f64,
    pub bytes: u64,
    /// Segment duration declared by the manifest, segment probes only
    pub declared_duration_ms: Option<f64>,
}

impl MetricSample {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Download time relative to declared segment duration. Defined only
    /// for ok segment probes with a positive declared duration; > 1.0
    /// means downloading slower than real time.
    pub fn download_ratio(&self) -> Option<f64> {
        match (self.kind, &self.outcome, self.declared_duration_ms) {
            (ProbeKind::Segment, ProbeOutcome::Ok, Some(duration_ms)) if duration_ms > 0.0 => {
                Some(self.total_ms / duration_ms)
            }
            _ => None,
        }
    }
}

/// Compact sample projection for the fan-out channel
#[derive(Debug, Clone, Serialize)]
pub struct SamplePayload {
    pub kind: ProbeKind,
    pub url: String,
    pub outcome: ProbeOutcome,
    pub ttfb_ms: Option<f64>,
    pub total_ms: f64,
    pub bytes: u64,
    pub download_ratio: Option<f64>,
}

impl From<&MetricSample> for SamplePayload {
    fn from(sample: &MetricSample) -> Self {
        Self {
            kind: sample.kind,
            url: sample.url.clone(),
            outcome: sample.outcome.clone(),
            ttfb_ms: sample.ttfb_ms,
            total_ms: sample.total_ms,
            bytes: sample.bytes,
            download_ratio: sample.download_ratio(),
        }
    }
}

/// Tri-state health model: is it working, degraded, or broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Green => write!(f, "GREEN"),
            HealthState::Yellow => write!(f, "YELLOW"),
            HealthState::Red => write!(f, "RED"),
        }
    }
}

/// Aggregates over the evaluation window, kept on the snapshot for
/// operator context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub sample_count: usize,
    pub error_count: usize,
    pub avg_ttfb_ms: Option<f64>,
    pub avg_download_ratio: Option<f64>,
}

/// Current health with a human-readable explanation. The state is a pure
/// function of the evaluation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
    pub window: WindowStats,
}

/// An emitted health transition. `at`/`mono` mark the onset of the new
/// state, which for deferred YELLOW transitions predates the emission.
#[derive(Debug, Clone, Serialize)]
pub struct HealthTransition {
    pub from: HealthState,
    pub to: HealthState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub mono: Instant,
    pub reason: String,
}

/// Incident lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// Types of events in an incident timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    SegmentOk,
    SegmentFail,
    ManifestFail,
    HealthTransition,
    IncidentOpened,
    IncidentAcknowledged,
    IncidentResolved,
    ThumbnailCaptured,
}

/// Single event in an incident timeline. Ids are monotone per stream, so
/// equal timestamps order by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: u64,
    pub at: DateTime<Utc>,
    pub kind: TimelineEventKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
}

/// An operator-facing record of a sustained problem.
///
/// At most one incident per stream is OPEN or ACKNOWLEDGED at any time;
/// resolution is only ever triggered by sustained GREEN health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub stream_id: String,
    pub status: IncidentStatus,
    pub trigger_reason: String,
    pub opened_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEvent>,
}

impl Incident {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            IncidentStatus::Open | IncidentStatus::Acknowledged
        )
    }
}

/// Probable-cause labels, fixed enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootCauseLabel {
    #[serde(rename = "Origin/CDN Outage")]
    OriginCdnOutage,
    #[serde(rename = "Encoder/Packager Issue")]
    EncoderPackagerIssue,
    #[serde(rename = "Network Congestion")]
    NetworkCongestion,
    #[serde(rename = "CDN Edge Latency")]
    CdnEdgeLatency,
    #[serde(rename = "Intermittent Failures")]
    IntermittentFailures,
    #[serde(rename = "Insufficient Evidence")]
    InsufficientEvidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseConfidence {
    Low,
    Medium,
    High,
}

/// Rule-based classification with numeric evidence. No scoring model;
/// every classification cites facts an operator can verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub label: RootCauseLabel,
    pub confidence: Option<RootCauseConfidence>,
    pub evidence: Vec<String>,
}

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Init,
    Running,
    Stopping,
    Stopped,
}

/// Fan-out event envelope. Serializes as
/// `{stream_id, ts, event, payload}`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub stream_id: String,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StreamEventKind {
    HealthChanged {
        state: HealthState,
        previous: HealthState,
        reason: String,
    },
    IncidentOpened {
        incident_id: String,
        trigger_reason: String,
    },
    IncidentAcknowledged {
        incident_id: String,
    },
    IncidentResolved {
        incident_id: String,
    },
    SampleAppended(SamplePayload),
}

/// Stream list entry
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub id: String,
    pub name: String,
    pub manifest_url: String,
    pub created_at: DateTime<Utc>,
    pub state: SupervisorState,
    pub health: Option<HealthSnapshot>,
    pub active_incident_id: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Full stream view for the investigation surface
#[derive(Debug, Clone, Serialize)]
pub struct StreamDetail {
    #[serde(flatten)]
    pub stream: Stream,
    pub state: SupervisorState,
    pub health: Option<HealthSnapshot>,
    pub active_incident: Option<Incident>,
    pub root_cause: Option<RootCause>,
    pub last_sample: Option<SamplePayload>,
    pub thumbnail_url: Option<String>,
}

/// One per-minute bucket of the chart history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub bucket_start: DateTime<Utc>,
    pub avg_ttfb_ms: Option<f64>,
    pub avg_download_ratio: Option<f64>,
    pub error_count: usize,
}

/// Recorded health transition for charts
#[derive(Debug, Clone, Serialize)]
pub struct HealthTransitionRecord {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub mono: Instant,
    pub from: HealthState,
    pub to: HealthState,
}

/// Aggregated series backing the history charts
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPayload {
    pub stream_id: String,
    pub points: Vec<HistoryPoint>,
    pub health_transitions: Vec<HealthTransitionRecord>,
}

/// Filter for incident listings
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub stream_id: Option<String>,
    pub active_only: bool,
}

/// Process-level health for the `/health` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: String,
    pub streams_monitored: usize,
    pub active_incidents: usize,
    pub uptime_s: u64,
}
