use crate::controller::ApiResponse;
use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::{AppState, Error};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;
use serde_json::{json, Value};
use upstream::{ErrorKind, PublishOptions};

/// POST /api/hives/:hive_id/commands
///
/// Forwards the JSON body to the hive's command topic.
pub async fn create(
    AuthenticatedUser(user): AuthenticatedUser,
    State(app_state): State<AppState>,
    Path(hive_id): Path<String>,
    Json(command): Json<Value>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST command for hive {hive_id} from user {}", user.id);

    if !app_state.publisher.is_connected() {
        warn!("Refusing command for hive {hive_id}: upstream disconnected");
        return Err(upstream::Error::new(ErrorKind::Disconnected).into());
    }

    let topic = app_state.topic_router.command_topic(&hive_id);
    app_state
        .publisher
        .publish(&topic, &command, PublishOptions::default())
        .await?;

    info!("Forwarded command for hive {hive_id} to {topic}");
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(json!({ "topic": topic }))),
    ))
}
