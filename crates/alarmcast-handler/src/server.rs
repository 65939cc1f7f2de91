//! HTTP trigger receiver
//!
//! Storage triggers POST their event body to `/events`. Events are handled
//! sequentially within the request; the first failure aborts the request
//! with an error status so the sender can apply its own retry policy.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use alarmcast_core::types::TriggerPayload;
use alarmcast_core::{Error, NotifierConfig, Result};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{debug, info};

use crate::handler::{HandleOutcome, UploadHandler};
use crate::metrics::{self, metrics_handler, MetricsRecorder};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<UploadHandler>,
    /// Bucket the trigger is registered on, if restricted
    pub bucket: Option<String>,
    pub start_time: Instant,
    pub metrics: Arc<MetricsRecorder>,
}

/// Per-request tally returned to the trigger
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct EventsSummary {
    pub published: usize,
    pub skipped: usize,
    pub ignored: usize,
}

/// Error body: `{"code": ..., "message": ...}`
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub struct NotifierServer {
    config: NotifierConfig,
}

impl NotifierServer {
    pub fn new(config: NotifierConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let start_time = Instant::now();

        let metrics = Arc::new(MetricsRecorder::install()?);
        info!("Prometheus metrics initialized");

        let signer = alarmcast_storage::signer_from_config(&self.config.storage).await?;
        let handler = UploadHandler::new(signer, self.config.broker_settings())
            .url_ttl_secs(self.config.storage.url_expiry_secs);

        let state = AppState {
            handler: Arc::new(handler),
            bucket: self.config.trigger.bucket.clone(),
            start_time,
            metrics,
        };

        let app = create_router(state);
        let addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        let listener = TcpListener::bind(&addr).await?;

        info!("Alarmcast trigger receiver listening on http://{}", addr);
        info!("Prometheus metrics at http://{}/metrics", addr);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(receive_events))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}

pub async fn receive_events(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<Json<EventsSummary>, ApiError> {
    let events = TriggerPayload::from_json(&body)?.upload_events()?;
    debug!(count = events.len(), "Trigger payload received");

    let mut summary = EventsSummary::default();
    for event in events {
        if let Some(bucket) = &state.bucket {
            if &event.bucket != bucket {
                debug!(bucket = %event.bucket, expected = %bucket, "Event for another bucket, ignoring");
                metrics::record_event_ignored();
                summary.ignored += 1;
                continue;
            }
        }

        match state.handler.handle(&event).await? {
            HandleOutcome::Skipped => summary.skipped += 1,
            HandleOutcome::Published(_) => summary.published += 1,
        }
    }

    Ok(Json(summary))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": alarmcast_core::VERSION,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
