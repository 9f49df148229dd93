//! Process-wide stream registry and snapshot API
//!
//! The registry owns every supervisor, the metric store, the incident
//! manager, and the fan-out channel. External interfaces read through it
//! only: all queries return point-in-time copies, never references into
//! live state, so no caller needs locks.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::incidents::IncidentManager;
use crate::metrics::MetricStore;
use crate::models::{
    HealthState, HistoryPayload, Incident, IncidentFilter, ServiceHealth, Stream, StreamDetail,
    StreamEvent, StreamEventKind, StreamSummary, TimelineEvent,
};
use crate::probe::{HttpProber, ProbeTransport, Prober};
use crate::registry::persistence::StreamStore;
use crate::rootcause;
use crate::supervisor::{self, StreamHandle, SupervisorContext};
use crate::thumbnails::ThumbnailService;

pub mod persistence;

/// Fan-out buffer; slow subscribers lag and drop the oldest events rather
/// than back-pressuring the supervisors
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Registry {
    config: Arc<Config>,
    store: Arc<MetricStore>,
    incidents: Arc<IncidentManager>,
    prober: Prober,
    thumbnails: Option<Arc<ThumbnailService>>,
    events: broadcast::Sender<StreamEvent>,
    streams: RwLock<HashMap<String, StreamHandle>>,
    persistence: StreamStore,
    shutdown_token: CancellationToken,
    started_at: Instant,
}

impl Registry {
    /// Start with the production HTTP prober and the thumbnail tool.
    pub async fn start(config: Config) -> anyhow::Result<Arc<Self>> {
        let thumbnails = Arc::new(
            ThumbnailService::new(&config.thumbnails, config.storage.thumbnails_dir()).await,
        );
        Self::start_with(config, Arc::new(HttpProber::new()), Some(thumbnails)).await
    }

    /// Start with a custom probe transport. This is the seam the test
    /// suite drives scripted origins through.
    pub async fn start_with(
        config: Config,
        transport: Arc<dyn ProbeTransport>,
        thumbnails: Option<Arc<ThumbnailService>>,
    ) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let persistence = StreamStore::new(config.storage.streams_file());

        let persisted = match persistence.load().await {
            Ok(streams) => streams,
            Err(e) => {
                // in-memory state is authoritative; start empty rather
                // than refuse to monitor
                error!("Failed to load persisted streams: {e}");
                Vec::new()
            }
        };

        let registry = Arc::new(Self {
            store: Arc::new(MetricStore::new(&config.monitor)),
            incidents: Arc::new(IncidentManager::new(&config.monitor)),
            prober: Prober::new(transport, config.monitor.probe_timeout),
            thumbnails,
            events,
            streams: RwLock::new(HashMap::new()),
            persistence,
            shutdown_token: CancellationToken::new(),
            started_at: Instant::now(),
            config,
        });

        if let Some(thumbnails) = &registry.thumbnails {
            thumbnails.spawn_sweeper(
                registry.config.thumbnails.sweep_interval,
                registry.config.thumbnails.max_age,
                registry.shutdown_token.clone(),
            );
        }

        for stream in persisted {
            info!("Resuming monitoring for persisted stream {}", stream.id);
            registry.spawn_supervisor(stream).await;
        }

        Ok(registry)
    }

    async fn spawn_supervisor(&self, stream: Stream) {
        self.store.register(&stream.id).await;
        let ctx = SupervisorContext {
            config: self.config.clone(),
            store: self.store.clone(),
            incidents: self.incidents.clone(),
            prober: self.prober.clone(),
            thumbnails: self.thumbnails.clone(),
            events: self.events.clone(),
        };
        let handle = supervisor::spawn(stream.clone(), ctx);
        self.streams.write().await.insert(stream.id, handle);
    }

    /// Create a stream and start supervising it. Fails on an invalid
    /// manifest URL or when the URL is already monitored.
    pub async fn create_stream(&self, name: &str, manifest_url: &str) -> AppResult<Stream> {
        let manifest_url = manifest_url.trim();
        if manifest_url.is_empty() {
            return Err(AppError::validation("manifest_url is required"));
        }
        let parsed = Url::parse(manifest_url)
            .map_err(|e| AppError::validation(format!("invalid manifest url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::validation(format!(
                "unsupported manifest url scheme '{}'",
                parsed.scheme()
            )));
        }

        {
            let streams = self.streams.read().await;
            if streams
                .values()
                .any(|h| h.stream.manifest_url == manifest_url)
            {
                return Err(AppError::DuplicateStream {
                    url: manifest_url.to_string(),
                });
            }
        }

        let name = name.trim();
        let stream = Stream {
            id: Uuid::new_v4().to_string(),
            name: if name.is_empty() {
                manifest_url.to_string()
            } else {
                name.to_string()
            },
            manifest_url: manifest_url.to_string(),
            created_at: Utc::now(),
        };

        info!("Created stream {} ({})", stream.name, stream.id);
        self.spawn_supervisor(stream.clone()).await;
        self.persist().await;
        Ok(stream)
    }

    /// Remove a stream. Blocks until its supervisor reaches STOPPED or the
    /// grace timeout elapses, after which the task is torn down
    /// unconditionally.
    pub async fn delete_stream(&self, id: &str) -> AppResult<()> {
        let mut handle = {
            let mut streams = self.streams.write().await;
            streams
                .remove(id)
                .ok_or_else(|| AppError::not_found("stream", id))?
        };

        handle.cancel();
        let grace = self.config.monitor.shutdown_grace;
        if tokio::time::timeout(grace, handle.wait_stopped())
            .await
            .is_err()
        {
            warn!("Supervisor for stream {id} did not stop within {grace:?}; aborting");
            handle.abort();
        }

        self.store.remove(id).await;
        self.incidents.remove_stream(id).await;
        if let Some(thumbnails) = &self.thumbnails {
            thumbnails.remove_stream(id).await;
        }
        self.persist().await;
        info!("Deleted stream {id}");
        Ok(())
    }

    async fn persist(&self) {
        let mut streams: Vec<Stream> = self
            .streams
            .read()
            .await
            .values()
            .map(|h| h.stream.clone())
            .collect();
        streams.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Err(e) = self.persistence.save(&streams).await {
            // next successful write catches up
            error!("Failed to persist stream configuration: {e}");
        }
    }

    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn list_streams(&self) -> Vec<StreamSummary> {
        let streams = self.streams.read().await;
        let mut summaries = Vec::with_capacity(streams.len());
        for handle in streams.values() {
            summaries.push(StreamSummary {
                id: handle.stream.id.clone(),
                name: handle.stream.name.clone(),
                manifest_url: handle.stream.manifest_url.clone(),
                created_at: handle.stream.created_at,
                state: handle.state(),
                health: handle.health(),
                active_incident_id: self
                    .incidents
                    .active_incident(&handle.stream.id)
                    .await
                    .map(|i| i.id),
                thumbnail_url: match &self.thumbnails {
                    Some(thumbnails) => thumbnails.latest(&handle.stream.id).await,
                    None => None,
                },
            });
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    pub async fn get_stream(&self, id: &str) -> AppResult<StreamDetail> {
        let (stream, state, health) = {
            let streams = self.streams.read().await;
            let handle = streams
                .get(id)
                .ok_or_else(|| AppError::not_found("stream", id))?;
            (handle.stream.clone(), handle.state(), handle.health())
        };

        let active_incident = self.incidents.active_incident(id).await;

        // classification is on demand, for unhealthy snapshots or an
        // active incident
        let unhealthy = health
            .as_ref()
            .map(|h| h.state != HealthState::Green)
            .unwrap_or(false);
        let root_cause = if unhealthy || active_incident.is_some() {
            let window = self
                .store
                .window(id, Instant::now(), self.config.monitor.window_short)
                .await;
            Some(rootcause::classify(&window, &self.config.monitor))
        } else {
            None
        };

        Ok(StreamDetail {
            state,
            health,
            active_incident,
            root_cause,
            last_sample: self.store.last_sample(id).await.map(|s| (&s).into()),
            thumbnail_url: match &self.thumbnails {
                Some(thumbnails) => thumbnails.latest(id).await,
                None => None,
            },
            stream,
        })
    }

    pub async fn get_history(&self, id: &str, minutes: u64) -> AppResult<HistoryPayload> {
        self.ensure_exists(id).await?;
        let dur = std::time::Duration::from_secs(minutes.max(1) * 60)
            .min(self.config.monitor.window_long);
        Ok(self.store.history(id, Instant::now(), dur).await)
    }

    pub async fn get_timeline(&self, id: &str, limit: usize) -> AppResult<Vec<TimelineEvent>> {
        self.ensure_exists(id).await?;
        Ok(self.incidents.timeline(id, limit).await)
    }

    pub async fn list_incidents(&self, filter: &IncidentFilter) -> Vec<Incident> {
        self.incidents.list(filter).await
    }

    /// Acknowledge an incident; idempotent. Publishes the lifecycle event
    /// only when this call changed the incident.
    pub async fn acknowledge_incident(&self, incident_id: &str) -> AppResult<Incident> {
        let (incident, changed) = self.incidents.acknowledge(incident_id).await?;
        if changed {
            let _ = self.events.send(StreamEvent {
                stream_id: incident.stream_id.clone(),
                ts: Utc::now(),
                kind: StreamEventKind::IncidentAcknowledged {
                    incident_id: incident.id.clone(),
                },
            });
        }
        Ok(incident)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub async fn service_health(&self) -> ServiceHealth {
        ServiceHealth {
            status: "ok".to_string(),
            streams_monitored: self.stream_count().await,
            active_incidents: self.incidents.active_count().await,
            uptime_s: self.started_at.elapsed().as_secs(),
        }
    }

    /// Stop every supervisor and the maintenance task.
    pub async fn shutdown(&self) {
        info!("Shutting down registry");
        self.shutdown_token.cancel();

        let handles: Vec<StreamHandle> = {
            let mut streams = self.streams.write().await;
            streams.drain().map(|(_, handle)| handle).collect()
        };
        let grace = self.config.monitor.shutdown_grace;
        for mut handle in handles {
            handle.cancel();
            if tokio::time::timeout(grace, handle.wait_stopped())
                .await
                .is_err()
            {
                handle.abort();
            }
        }
    }

    async fn ensure_exists(&self, id: &str) -> AppResult<()> {
        if self.streams.read().await.contains_key(id) {
            Ok(())
        } else {
            Err(AppError::not_found("stream", id))
        }
    }

    pub fn monitor_config(&self) -> &crate::config::MonitorConfig {
        &self.config.monitor
    }
}
