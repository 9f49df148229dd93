//! Web layer
//!
//! HTTP interface over the registry: REST endpoints for streams,
//! incidents, and history, an SSE push channel, and static serving of
//! captured thumbnails. Handlers are thin; all business logic lives
//! behind the registry.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::registry::Registry;

pub mod events;
pub mod handlers;
pub mod responses;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, registry: Arc<Registry>) -> Result<Self> {
        let state = AppState { registry };

        let app = Router::new()
            .route("/health", get(handlers::health_check))
            .route(
                "/api/streams",
                get(handlers::list_streams).post(handlers::create_stream),
            )
            .route(
                "/api/streams/{id}",
                get(handlers::get_stream).delete(handlers::delete_stream),
            )
            .route(
                "/api/streams/{id}/metrics/history",
                get(handlers::stream_history),
            )
            .route("/api/streams/{id}/timeline", get(handlers::stream_timeline))
            .route("/api/incidents", get(handlers::list_incidents))
            .route(
                "/api/incidents/{id}/acknowledge",
                post(handlers::acknowledge_incident),
            )
            .route("/api/events", get(events::events_stream))
            .with_state(state)
            .nest_service(
                "/thumbnails",
                ServeDir::new(config.storage.thumbnails_dir()),
            )
            .layer(CorsLayer::permissive());

        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;
        Ok(Self { app, addr })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}
