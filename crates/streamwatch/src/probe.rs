//! Observational HTTP probing
//!
//! One probe is one GET: connect, wait for the first response byte, read
//! the body to the end, and record what happened. The probe never fails —
//! every network, HTTP, or transport problem is encoded in the sample's
//! outcome. Redirects are followed manually (up to [`MAX_REDIRECTS`]) so
//! the last status code of a broken chain stays observable.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, redirect, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::models::{MetricSample, ProbeKind, ProbeOutcome};

pub const MAX_REDIRECTS: usize = 5;

/// Raw result of a single observational fetch
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub outcome: ProbeOutcome,
    /// Time to the first response byte, if a response started
    pub ttfb: Option<Duration>,
    pub total: Duration,
    pub bytes: u64,
    /// Full body, present only when requested and the outcome is ok
    pub body: Option<Vec<u8>>,
}

impl FetchResult {
    fn failed(outcome: ProbeOutcome, ttfb: Option<Duration>, total: Duration, bytes: u64) -> Self {
        Self {
            outcome,
            ttfb,
            total,
            bytes,
            body: None,
        }
    }
}

/// Transport seam for the probe client. Production uses [`HttpProber`];
/// tests script outcomes with fakes.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Fetch `url` under a hard deadline. When `collect_body` is false the
    /// body is drained and counted but not retained. Cancellation must be
    /// honored within one deadline interval; a cancelled fetch reports an
    /// `Other` outcome and the caller discards the observation.
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        collect_body: bool,
        cancel: &CancellationToken,
    ) -> FetchResult;
}

/// reqwest-backed probe transport
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Self {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(concat!("streamwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeTransport for HttpProber {
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        collect_body: bool,
        cancel: &CancellationToken,
    ) -> FetchResult {
        let started = Instant::now();
        let deadline = started + timeout;

        let mut current = url.to_string();
        let mut visited: Vec<String> = Vec::new();
        let mut ttfb = None;

        for hop in 0..=MAX_REDIRECTS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return FetchResult::failed(ProbeOutcome::Timeout, ttfb, started.elapsed(), 0);
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Probe cancelled before response: {current}");
                    return FetchResult::failed(ProbeOutcome::Other, ttfb, started.elapsed(), 0);
                }
                result = tokio::time::timeout(remaining, self.client.get(&current).send()) => {
                    match result {
                        Err(_) => {
                            return FetchResult::failed(
                                ProbeOutcome::Timeout,
                                ttfb,
                                started.elapsed(),
                                0,
                            )
                        }
                        Ok(Err(e)) => {
                            return FetchResult::failed(
                                classify_transport_error(&e),
                                ttfb,
                                started.elapsed(),
                                0,
                            )
                        }
                        Ok(Ok(response)) => response,
                    }
                }
            };

            ttfb = Some(started.elapsed());
            let status = response.status();

            if status.is_redirection() {
                let code = status.as_u16();
                let Some(next) = redirect_target(&current, &response) else {
                    return FetchResult::failed(
                        ProbeOutcome::HttpError(code),
                        ttfb,
                        started.elapsed(),
                        0,
                    );
                };
                if hop == MAX_REDIRECTS || visited.contains(&next) {
                    return FetchResult::failed(
                        ProbeOutcome::HttpError(code),
                        ttfb,
                        started.elapsed(),
                        0,
                    );
                }
                visited.push(std::mem::replace(&mut current, next));
                continue;
            }

            if !status.is_success() {
                return FetchResult::failed(
                    ProbeOutcome::HttpError(status.as_u16()),
                    ttfb,
                    started.elapsed(),
                    0,
                );
            }

            return read_body(response, deadline, started, ttfb, collect_body, cancel).await;
        }

        unreachable!("redirect loop is bounded by MAX_REDIRECTS")
    }
}

async fn read_body(
    mut response: reqwest::Response,
    deadline: Instant,
    started: Instant,
    ttfb: Option<Duration>,
    collect_body: bool,
    cancel: &CancellationToken,
) -> FetchResult {
    let mut bytes: u64 = 0;
    let mut body = collect_body.then(Vec::new);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return FetchResult::failed(ProbeOutcome::Timeout, ttfb, started.elapsed(), bytes);
        }

        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                return FetchResult::failed(ProbeOutcome::Other, ttfb, started.elapsed(), bytes);
            }
            result = tokio::time::timeout(remaining, response.chunk()) => match result {
                Err(_) => {
                    return FetchResult::failed(
                        ProbeOutcome::Timeout,
                        ttfb,
                        started.elapsed(),
                        bytes,
                    )
                }
                // transport error mid-body; the partial byte count stands
                Ok(Err(_)) => {
                    return FetchResult::failed(
                        ProbeOutcome::Other,
                        ttfb,
                        started.elapsed(),
                        bytes,
                    )
                }
                Ok(Ok(chunk)) => chunk,
            },
        };

        match chunk {
            Some(chunk) => {
                bytes += chunk.len() as u64;
                if let Some(buf) = body.as_mut() {
                    buf.extend_from_slice(&chunk);
                }
            }
            None => break,
        }
    }

    FetchResult {
        outcome: ProbeOutcome::Ok,
        ttfb,
        total: started.elapsed(),
        bytes,
        body,
    }
}

fn redirect_target(current: &str, response: &reqwest::Response) -> Option<String> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())?;
    let base = Url::parse(current).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

fn classify_transport_error(error: &reqwest::Error) -> ProbeOutcome {
    if error.is_timeout() {
        return ProbeOutcome::Timeout;
    }
    if error.is_connect() {
        // reqwest does not expose resolver failures as a distinct kind, so
        // inspect the error chain for the resolver's wording
        let chain = format!("{error:?}").to_lowercase();
        if chain.contains("dns") || chain.contains("resolve") {
            return ProbeOutcome::Dns;
        }
        return ProbeOutcome::Connect;
    }
    ProbeOutcome::Other
}

/// Probe client: turns raw fetches into [`MetricSample`]s.
#[derive(Clone)]
pub struct Prober {
    transport: Arc<dyn ProbeTransport>,
    timeout: Duration,
}

impl Prober {
    pub fn new(transport: Arc<dyn ProbeTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform one observation. Never fails; all failures appear in the
    /// sample's outcome. Returns the manifest body alongside the sample so
    /// the caller can parse it.
    pub async fn probe(
        &self,
        url: &str,
        kind: ProbeKind,
        declared_duration_ms: Option<f64>,
        cancel: &CancellationToken,
    ) -> (MetricSample, Option<Vec<u8>>) {
        let at = Utc::now();
        let mono = Instant::now();
        let collect_body = kind == ProbeKind::Manifest;

        let result = self
            .transport
            .fetch(url, self.timeout, collect_body, cancel)
            .await;

        debug!(
            "Probe {kind:?} {url}: {} in {:.0}ms ({} bytes)",
            result.outcome,
            result.total.as_secs_f64() * 1000.0,
            result.bytes
        );

        let sample = MetricSample {
            at,
            mono,
            kind,
            url: url.to_string(),
            outcome: result.outcome,
            ttfb_ms: result.ttfb.map(|d| d.as_secs_f64() * 1000.0),
            total_ms: result.total.as_secs_f64() * 1000.0,
            bytes: result.bytes,
            declared_duration_ms,
        };
        (sample, result.body)
    }
}
