//! HTTP request handlers
//!
//! Thin handlers that delegate to the registry. Responses serialize the
//! snapshot types directly; every read is a point-in-time copy. Each
//! handler logs the request it serves at debug level.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{
    HistoryPayload, Incident, IncidentFilter, ServiceHealth, Stream, StreamDetail, StreamSummary,
    TimelineEvent,
};
use crate::web::AppState;

const DEFAULT_HISTORY_MINUTES: u64 = 60;
const DEFAULT_TIMELINE_LIMIT: usize = 100;

fn log_request(method: &str, path: &str) {
    debug!("{method} {path}");
}

pub async fn health_check(State(state): State<AppState>) -> Json<ServiceHealth> {
    log_request("GET", "/health");
    Json(state.registry.service_health().await)
}

pub async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamSummary>> {
    log_request("GET", "/api/streams");
    Json(state.registry.list_streams().await)
}

#[derive(Debug, Deserialize)]
pub struct CreateStreamParams {
    pub name: Option<String>,
    pub manifest_url: Option<String>,
}

pub async fn create_stream(
    State(state): State<AppState>,
    Query(params): Query<CreateStreamParams>,
) -> AppResult<(StatusCode, Json<Stream>)> {
    log_request("POST", "/api/streams");
    let manifest_url = params
        .manifest_url
        .ok_or_else(|| AppError::validation("manifest_url is required"))?;
    let stream = state
        .registry
        .create_stream(params.name.as_deref().unwrap_or(""), &manifest_url)
        .await?;
    Ok((StatusCode::CREATED, Json(stream)))
}

pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<StreamDetail>> {
    log_request("GET", &format!("/api/streams/{id}"));
    Ok(Json(state.registry.get_stream(&id).await?))
}

pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    log_request("DELETE", &format!("/api/streams/{id}"));
    state.registry.delete_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub minutes: Option<u64>,
}

pub async fn stream_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<HistoryPayload>> {
    let minutes = params.minutes.unwrap_or(DEFAULT_HISTORY_MINUTES);
    log_request("GET", &format!("/api/streams/{id}/metrics/history?minutes={minutes}"));
    Ok(Json(state.registry.get_history(&id, minutes).await?))
}

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    pub limit: Option<usize>,
}

pub async fn stream_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> AppResult<Json<Vec<TimelineEvent>>> {
    let limit = params.limit.unwrap_or(DEFAULT_TIMELINE_LIMIT);
    log_request("GET", &format!("/api/streams/{id}/timeline?limit={limit}"));
    Ok(Json(state.registry.get_timeline(&id, limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct IncidentParams {
    pub active_only: Option<bool>,
    pub stream_id: Option<String>,
}

pub async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<IncidentParams>,
) -> Json<Vec<Incident>> {
    log_request("GET", "/api/incidents");
    let filter = IncidentFilter {
        stream_id: params.stream_id,
        active_only: params.active_only.unwrap_or(false),
    };
    Json(state.registry.list_incidents(&filter).await)
}

pub async fn acknowledge_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Incident>> {
    log_request("POST", &format!("/api/incidents/{id}/acknowledge"));
    Ok(Json(state.registry.acknowledge_incident(&id).await?))
}
