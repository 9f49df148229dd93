//! Per-stream metric storage and windowed queries
//!
//! Each stream owns a bounded append-only ring of samples plus a ring of
//! recorded health transitions. There is exactly one writer per stream
//! (its supervisor); readers get copied slices, so a window returned at
//! time t is never mutated by later appends.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::models::{
    HealthTransitionRecord, HistoryPayload, HistoryPoint, MetricSample,
};

/// Extra ring headroom beyond the long-window capacity
const RING_MARGIN: usize = 16;

#[derive(Default)]
struct StreamSeries {
    samples: VecDeque<MetricSample>,
    transitions: VecDeque<HealthTransitionRecord>,
}

pub struct MetricStore {
    sample_capacity: usize,
    transition_capacity: usize,
    inner: RwLock<HashMap<String, StreamSeries>>,
}

impl MetricStore {
    /// Size the rings to cover the long history window at the maximum
    /// sampling rate: one manifest plus one segment probe per tick.
    pub fn new(monitor: &MonitorConfig) -> Self {
        let ticks = (monitor.window_long.as_secs() / monitor.poll_interval.as_secs().max(1))
            .max(1) as usize;
        Self {
            sample_capacity: ticks * 2 + RING_MARGIN,
            transition_capacity: ticks + RING_MARGIN,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, stream_id: &str) {
        self.inner
            .write()
            .await
            .entry(stream_id.to_string())
            .or_default();
    }

    pub async fn remove(&self, stream_id: &str) {
        self.inner.write().await.remove(stream_id);
    }

    /// Append one observation. The single-writer contract keeps samples in
    /// non-decreasing monotonic order; an out-of-order append is dropped
    /// rather than corrupting the ring.
    pub async fn append(&self, stream_id: &str, sample: MetricSample) {
        let mut inner = self.inner.write().await;
        let series = inner.entry(stream_id.to_string()).or_default();

        if let Some(last) = series.samples.back() {
            if sample.mono < last.mono {
                warn!("Dropping out-of-order sample for stream {stream_id}");
                return;
            }
        }

        series.samples.push_back(sample);
        while series.samples.len() > self.sample_capacity {
            series.samples.pop_front();
        }
    }

    pub async fn record_transition(&self, stream_id: &str, record: HealthTransitionRecord) {
        let mut inner = self.inner.write().await;
        let series = inner.entry(stream_id.to_string()).or_default();
        series.transitions.push_back(record);
        while series.transitions.len() > self.transition_capacity {
            series.transitions.pop_front();
        }
    }

    pub async fn last_sample(&self, stream_id: &str) -> Option<MetricSample> {
        self.inner
            .read()
            .await
            .get(stream_id)
            .and_then(|s| s.samples.back().cloned())
    }

    /// Copy of the samples whose monotonic timestamp lies in
    /// `(now - dur, now]`. The returned slice is stable for the reader's
    /// lifetime.
    pub async fn window(&self, stream_id: &str, now: Instant, dur: Duration) -> Vec<MetricSample> {
        let inner = self.inner.read().await;
        let Some(series) = inner.get(stream_id) else {
            return Vec::new();
        };
        series
            .samples
            .iter()
            .filter(|s| in_window(s.mono, now, dur))
            .cloned()
            .collect()
    }

    /// Per-minute bucketed series for charts plus the raw transition list,
    /// both restricted to `(now - dur, now]`.
    pub async fn history(&self, stream_id: &str, now: Instant, dur: Duration) -> HistoryPayload {
        let inner = self.inner.read().await;
        let Some(series) = inner.get(stream_id) else {
            return HistoryPayload {
                stream_id: stream_id.to_string(),
                points: Vec::new(),
                health_transitions: Vec::new(),
            };
        };

        let mut buckets: Vec<(i64, BucketAccumulator)> = Vec::new();
        for sample in series.samples.iter().filter(|s| in_window(s.mono, now, dur)) {
            let key = sample.at.timestamp().div_euclid(60);
            if buckets.last().map(|(k, _)| *k) != Some(key) {
                buckets.push((key, BucketAccumulator::default()));
            }
            let (_, bucket) = buckets.last_mut().expect("bucket was just pushed");
            bucket.add(sample);
        }

        let points = buckets
            .into_iter()
            .filter_map(|(key, acc)| acc.finish(key))
            .collect();

        let health_transitions = series
            .transitions
            .iter()
            .filter(|t| in_window(t.mono, now, dur))
            .cloned()
            .collect();

        HistoryPayload {
            stream_id: stream_id.to_string(),
            points,
            health_transitions,
        }
    }
}

fn in_window(mono: Instant, now: Instant, dur: Duration) -> bool {
    mono <= now && now.saturating_duration_since(mono) < dur
}

#[derive(Default)]
struct BucketAccumulator {
    ttfb_sum: f64,
    ttfb_count: usize,
    ratio_sum: f64,
    ratio_count: usize,
    error_count: usize,
}

impl BucketAccumulator {
    fn add(&mut self, sample: &MetricSample) {
        if sample.is_ok() {
            if let Some(ttfb) = sample.ttfb_ms {
                self.ttfb_sum += ttfb;
                self.ttfb_count += 1;
            }
            if let Some(ratio) = sample.download_ratio() {
                self.ratio_sum += ratio;
                self.ratio_count += 1;
            }
        } else {
            self.error_count += 1;
        }
    }

    fn finish(self, bucket_key: i64) -> Option<HistoryPoint> {
        let bucket_start = chrono::DateTime::from_timestamp(bucket_key * 60, 0)?;
        Some(HistoryPoint {
            bucket_start,
            avg_ttfb_ms: (self.ttfb_count > 0).then(|| self.ttfb_sum / self.ttfb_count as f64),
            avg_download_ratio: (self.ratio_count > 0)
                .then(|| self.ratio_sum / self.ratio_count as f64),
            error_count: self.error_count,
        })
    }
}
