//! Ops HTTP endpoint: health and Prometheus metrics

use crate::state::CoordinationCore;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use hazard_core::RunwayId;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

pub fn create_router(core: Arc<CoordinationCore>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub database: String,
    pub admin_clients: usize,
    pub pilot_clients: usize,
    pub intake_clients: usize,
    pub admin_pushes: usize,
    pub runway_a: String,
    pub runway_b: String,
    pub bird_risk: String,
    pub persist_queue: usize,
    pub tracked_objects: usize,
}

pub fn health_report(core: &CoordinationCore) -> HealthResponse {
    let (runway_a, runway_b) = {
        let runway = core.runway.lock();
        (runway.status(RunwayId::A), runway.status(RunwayId::B))
    };
    let db_ready = core.gateway.is_ready();

    HealthResponse {
        status: if db_ready { "healthy" } else { "degraded" }.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now().to_rfc3339(),
        database: if db_ready { "connected" } else { "unavailable" }.into(),
        admin_clients: core.admin_hub.client_count(),
        pilot_clients: core.pilot_hub.client_count(),
        intake_clients: core.intake_hub.client_count(),
        admin_pushes: core.admin_hub.message_count(),
        runway_a: runway_a.as_str().into(),
        runway_b: runway_b.as_str().into(),
        bird_risk: core.bird_risk().as_wire().into(),
        persist_queue: core.writer.pending(),
        tracked_objects: core.dedup.tracked(),
    }
}

pub async fn health_check(State(core): State<Arc<CoordinationCore>>) -> impl IntoResponse {
    Json(health_report(&core))
}

/// Prometheus metrics endpoint
pub async fn metrics(State(core): State<Arc<CoordinationCore>>) -> impl IntoResponse {
    core.metrics
        .set_persist_queue(core.writer.pending(), core.writer.dropped());
    core.metrics.set_db_connected(core.gateway.is_ready());

    match core.metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                String::new(),
            )
        }
    }
}
