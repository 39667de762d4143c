use crate::controller::{health_check_controller, hive_command_controller, system_controller};
use crate::{sse, ws, AppState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes(app_state.clone()))
        .merge(system_routes(app_state.clone()))
        .merge(hive_command_routes(app_state.clone()))
        .merge(realtime_routes(app_state))
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .route(
            "/api/system/health",
            get(health_check_controller::system_health),
        )
        .with_state(app_state)
}

fn system_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/api/system/status", get(system_controller::status))
        .with_state(app_state)
}

fn hive_command_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/hives/:hive_id/commands",
            post(hive_command_controller::create),
        )
        .with_state(app_state)
}

fn realtime_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler::ws_handler))
        .route("/api/sse/events", get(sse::handler::sse_handler))
        .with_state(app_state)
}
