use crate::{db, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub database: ComponentHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// Readiness probe: up only while the database answers
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start = Instant::now();
    let (status, message) = match db::check_connection(&state.db).await {
        Ok(()) => (ComponentStatus::Up, None),
        Err(e) => {
            warn!(error = %e, "health check: database unreachable");
            (ComponentStatus::Down, Some("database unreachable".to_string()))
        }
    };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database: ComponentHealth {
            status,
            latency_ms: start.elapsed().as_millis() as u64,
            message,
        },
    };

    let code = if status == ComponentStatus::Up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
