//! Rule-based root-cause classification
//!
//! Pure and stateless: for a fixed window the classification is always
//! the same. Rules are evaluated in priority order, first match wins, and
//! every result cites the numeric facts that fired the rule. No scoring
//! model — operators need to be able to verify the diagnosis.

use crate::config::MonitorConfig;
use crate::models::{
    MetricSample, ProbeKind, ProbeOutcome, RootCause, RootCauseConfidence, RootCauseLabel,
};

/// Average TTFB above this, combined with slower-than-realtime downloads,
/// reads as congestion rather than edge latency
const TTFB_CONGESTION_MS: f64 = 800.0;

/// Download ratio above 1.0 means the client cannot keep up in real time
const RATIO_REALTIME: f64 = 1.0;

/// Classify the given evaluation window.
pub fn classify(samples: &[MetricSample], config: &MonitorConfig) -> RootCause {
    let manifest_fail_streak = samples
        .iter()
        .filter(|s| s.kind == ProbeKind::Manifest)
        .rev()
        .take_while(|s| !s.is_ok())
        .count();
    let manifest_ok = samples
        .iter()
        .any(|s| s.kind == ProbeKind::Manifest && s.is_ok());

    let segment_http_errors = samples
        .iter()
        .filter(|s| s.kind == ProbeKind::Segment)
        .filter(|s| matches!(s.outcome, ProbeOutcome::HttpError(_)))
        .count();

    let ttfbs: Vec<f64> = samples
        .iter()
        .filter(|s| s.is_ok())
        .filter_map(|s| s.ttfb_ms)
        .collect();
    let avg_ttfb = mean(&ttfbs);
    let ratios: Vec<f64> = samples.iter().filter_map(|s| s.download_ratio()).collect();
    let avg_ratio = mean(&ratios);

    let error_count = samples.iter().filter(|s| !s.is_ok()).count();
    let err_rate = if samples.is_empty() {
        0.0
    } else {
        error_count as f64 / samples.len() as f64
    };

    // Rule 1: the manifest itself is failing
    if manifest_fail_streak >= 2 {
        return RootCause {
            label: RootCauseLabel::OriginCdnOutage,
            confidence: Some(RootCauseConfidence::High),
            evidence: vec![format!(
                "{manifest_fail_streak} consecutive manifest failures"
            )],
        };
    }

    // Rule 2: manifest reachable but segments missing at the packager
    if manifest_ok && segment_http_errors >= 3 {
        return RootCause {
            label: RootCauseLabel::EncoderPackagerIssue,
            confidence: Some(RootCauseConfidence::Medium),
            evidence: vec![format!(
                "{segment_http_errors} segment HTTP errors, manifest ok"
            )],
        };
    }

    // Rule 3: very slow first byte and slower-than-realtime downloads
    if let (Some(ttfb), Some(ratio)) = (avg_ttfb, avg_ratio) {
        if ttfb > TTFB_CONGESTION_MS && ratio > RATIO_REALTIME {
            return RootCause {
                label: RootCauseLabel::NetworkCongestion,
                confidence: Some(RootCauseConfidence::Medium),
                evidence: vec![
                    format!("Avg TTFB {ttfb:.0} ms above {TTFB_CONGESTION_MS:.0} ms"),
                    format!("Avg download ratio {ratio:.2} above {RATIO_REALTIME:.2}"),
                ],
            };
        }
    }

    // Rule 4: slow first byte but downloads still keep up
    if let Some(ttfb) = avg_ttfb {
        if ttfb > config.ttfb_yellow_ms && avg_ratio.map_or(true, |r| r <= RATIO_REALTIME) {
            let mut evidence = vec![format!(
                "Avg TTFB {ttfb:.0} ms exceeded {:.0} ms threshold",
                config.ttfb_yellow_ms
            )];
            if let Some(ratio) = avg_ratio {
                evidence.push(format!("Download ratio {ratio:.2} at or below real time"));
            }
            return RootCause {
                label: RootCauseLabel::CdnEdgeLatency,
                confidence: Some(RootCauseConfidence::Low),
                evidence,
            };
        }
    }

    // Rule 5: errors with no clearer pattern
    if err_rate > 0.0 {
        return RootCause {
            label: RootCauseLabel::IntermittentFailures,
            confidence: Some(RootCauseConfidence::Low),
            evidence: vec![format!(
                "{error_count} failed probe(s) in window ({:.0}% error rate)",
                err_rate * 100.0
            )],
        };
    }

    RootCause {
        label: RootCauseLabel::InsufficientEvidence,
        confidence: None,
        evidence: Vec::new(),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
