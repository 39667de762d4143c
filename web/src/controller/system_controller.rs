use crate::controller::ApiResponse;
use crate::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use realtime::ConnectionKind;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Services {
    api: &'static str,
    mqtt: &'static str,
}

#[derive(Debug, Serialize)]
struct Connections {
    total: usize,
    bidirectional: usize,
    unidirectional: usize,
}

#[derive(Debug, Serialize)]
struct SystemStatus {
    services: Services,
    connections: Connections,
    timestamp: DateTime<Utc>,
}

/// GET /api/system/status
pub async fn status(State(app_state): State<AppState>) -> impl IntoResponse {
    let upstream = app_state.upstream_status.borrow().clone();
    let registry = &app_state.registry;

    Json(ApiResponse::new(SystemStatus {
        services: Services {
            api: "running",
            mqtt: if upstream.connected {
                "running"
            } else {
                "disconnected"
            },
        },
        connections: Connections {
            total: registry.len(),
            bidirectional: registry.count_by_kind(ConnectionKind::Bidirectional),
            unidirectional: registry.count_by_kind(ConnectionKind::Unidirectional),
        },
        timestamp: Utc::now(),
    }))
}
