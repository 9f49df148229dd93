//! End-to-end pipeline scenarios over a scripted origin.
//!
//! These run the real registry, supervisors, store, evaluator, incident
//! manager, and classifier against a fake transport under the paused
//! tokio clock, so 400 virtual seconds of monitoring complete in
//! milliseconds.

mod common;

use common::{OriginMode, ScriptedOrigin, MANIFEST_URL};
use std::sync::Arc;
use std::time::Duration;
use streamwatch::models::{
    HealthState, IncidentFilter, IncidentStatus, RootCauseConfidence, RootCauseLabel,
    StreamEvent, StreamEventKind, SupervisorState,
};
use streamwatch::registry::Registry;
use tokio::sync::broadcast;

fn drain(receiver: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn green_steady_state() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(ScriptedOrigin::healthy());
    let registry = Registry::start_with(common::test_config(&dir), origin, None)
        .await
        .unwrap();
    let mut events = registry.subscribe();

    let stream = registry
        .create_stream("Stream A", MANIFEST_URL)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(55)).await;

    let detail = registry.get_stream(&stream.id).await.unwrap();
    assert_eq!(detail.state, SupervisorState::Running);
    let health = detail.health.expect("health published after first tick");
    assert_eq!(health.state, HealthState::Green);
    assert!(health.reason.contains("ok"), "reason: {}", health.reason);
    assert_eq!(health.window.error_count, 0);
    // manifest + segment samples from ~6 ticks
    assert!(health.window.sample_count >= 10);
    assert!(detail.active_incident.is_none());
    assert!(detail.root_cause.is_none());

    // samples flowed on the push channel, and nothing else happened
    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, StreamEventKind::SampleAppended(_))));
    assert!(!events
        .iter()
        .any(|e| matches!(e.kind, StreamEventKind::IncidentOpened { .. })));
}

#[tokio::test(start_paused = true)]
async fn red_on_origin_outage() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(ScriptedOrigin::new(OriginMode::ManifestError(503)));
    let registry = Registry::start_with(common::test_config(&dir), origin, None)
        .await
        .unwrap();

    let stream = registry
        .create_stream("Stream B", MANIFEST_URL)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(35)).await;

    let detail = registry.get_stream(&stream.id).await.unwrap();
    let health = detail.health.unwrap();
    assert_eq!(health.state, HealthState::Red);
    assert!(
        health.reason.contains("Manifest failing"),
        "reason: {}",
        health.reason
    );

    let incident = detail.active_incident.expect("incident opened");
    assert_eq!(incident.status, IncidentStatus::Open);
    assert!(
        incident.trigger_reason.contains("RED"),
        "trigger: {}",
        incident.trigger_reason
    );
    // continued manifest failures land on the incident timeline
    assert!(incident
        .timeline
        .iter()
        .any(|e| e.message.contains("Manifest probe failed")));

    let cause = detail.root_cause.expect("root cause for unhealthy stream");
    assert_eq!(cause.label, RootCauseLabel::OriginCdnOutage);
    assert_eq!(cause.confidence, Some(RootCauseConfidence::High));
    assert!(cause.evidence[0].contains("consecutive manifest failures"));
}

#[tokio::test(start_paused = true)]
async fn yellow_ttfb_opens_incident_after_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(ScriptedOrigin::new(OriginMode::Healthy {
        ttfb_ms: 700,
        total_ms: 900,
    }));
    let registry = Registry::start_with(common::test_config(&dir), origin, None)
        .await
        .unwrap();
    let mut events = registry.subscribe();

    let stream = registry
        .create_stream("Stream C", MANIFEST_URL)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(45)).await;

    let detail = registry.get_stream(&stream.id).await.unwrap();
    let health = detail.health.unwrap();
    assert_eq!(health.state, HealthState::Yellow);
    assert!(health.reason.contains("700"), "reason: {}", health.reason);
    assert!(
        detail.active_incident.is_none(),
        "no incident before the persistence threshold"
    );

    // the flap window held the transition back, then reported it
    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        &e.kind,
        StreamEventKind::HealthChanged { state: HealthState::Yellow, .. }
    )));

    tokio::time::sleep(Duration::from_secs(30)).await;

    let detail = registry.get_stream(&stream.id).await.unwrap();
    let incident = detail.active_incident.expect("incident after 60s of YELLOW");
    assert!(
        incident.trigger_reason.contains("YELLOW"),
        "trigger: {}",
        incident.trigger_reason
    );

    let cause = detail.root_cause.unwrap();
    assert_eq!(cause.label, RootCauseLabel::CdnEdgeLatency);
    assert_eq!(cause.confidence, Some(RootCauseConfidence::Low));
}

#[tokio::test(start_paused = true)]
async fn incident_auto_resolves_after_sustained_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(ScriptedOrigin::new(OriginMode::ManifestError(503)));
    let registry = Registry::start_with(common::test_config(&dir), origin.clone(), None)
        .await
        .unwrap();
    let mut events = registry.subscribe();

    let stream = registry
        .create_stream("Stream D", MANIFEST_URL)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(65)).await;
    assert!(registry
        .get_stream(&stream.id)
        .await
        .unwrap()
        .active_incident
        .is_some());

    // origin recovers; the error window drains, health returns to GREEN,
    // and the resolve hold closes the incident
    origin.set_mode(OriginMode::Healthy {
        ttfb_ms: 120,
        total_ms: 300,
    });
    tokio::time::sleep(Duration::from_secs(335)).await;

    let detail = registry.get_stream(&stream.id).await.unwrap();
    assert_eq!(detail.health.unwrap().state, HealthState::Green);
    assert!(detail.active_incident.is_none());

    let incidents = registry
        .list_incidents(&IncidentFilter {
            stream_id: Some(stream.id.clone()),
            active_only: false,
        })
        .await;
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].status, IncidentStatus::Resolved);
    assert!(incidents[0].resolved_at.is_some());

    // the green transition precedes the resolution on the push channel
    let seen = drain(&mut events);
    let green_at = seen.iter().position(|e| {
        matches!(
            &e.kind,
            StreamEventKind::HealthChanged { state: HealthState::Green, .. }
        )
    });
    let resolved_at = seen
        .iter()
        .position(|e| matches!(&e.kind, StreamEventKind::IncidentResolved { .. }));
    assert!(green_at.is_some() && resolved_at.is_some());
    assert!(green_at.unwrap() < resolved_at.unwrap());
}

#[tokio::test(start_paused = true)]
async fn acknowledged_incident_survives_continued_failures() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(ScriptedOrigin::new(OriginMode::ManifestError(503)));
    let registry = Registry::start_with(common::test_config(&dir), origin, None)
        .await
        .unwrap();

    let stream = registry
        .create_stream("Stream E", MANIFEST_URL)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(65)).await;
    let incident = registry
        .get_stream(&stream.id)
        .await
        .unwrap()
        .active_incident
        .unwrap();

    let acked = registry.acknowledge_incident(&incident.id).await.unwrap();
    assert_eq!(acked.status, IncidentStatus::Acknowledged);
    assert!(acked.acknowledged_at.is_some());
    let timeline_before = acked.timeline.len();

    // failures keep coming; the acknowledged incident keeps collecting
    // them and no second incident opens
    tokio::time::sleep(Duration::from_secs(60)).await;

    let active = registry
        .list_incidents(&IncidentFilter {
            stream_id: Some(stream.id.clone()),
            active_only: true,
        })
        .await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, incident.id);
    assert_eq!(active[0].status, IncidentStatus::Acknowledged);
    assert!(active[0].timeline.len() > timeline_before);
}

#[tokio::test(start_paused = true)]
async fn segment_errors_classify_as_encoder_issue() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(ScriptedOrigin::new(OriginMode::SegmentError(404)));
    let registry = Registry::start_with(common::test_config(&dir), origin, None)
        .await
        .unwrap();

    let stream = registry
        .create_stream("Stream F", MANIFEST_URL)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(45)).await;

    let detail = registry.get_stream(&stream.id).await.unwrap();
    let cause = detail.root_cause.expect("unhealthy stream has a cause");
    assert_eq!(cause.label, RootCauseLabel::EncoderPackagerIssue);
    assert_eq!(cause.confidence, Some(RootCauseConfidence::Medium));
    assert!(
        cause.evidence[0].contains("segment HTTP errors, manifest ok"),
        "evidence: {:?}",
        cause.evidence
    );
}
