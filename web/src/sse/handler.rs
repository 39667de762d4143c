use crate::extractors::bearer_token::BearerToken;
use crate::{AppState, Error};
use async_stream::stream;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use log::*;
use realtime::{Admitted, ConnectionKind, Outbound};
use serde::Deserialize;
use std::convert::Infallible;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamParams {
    /// Comma separated hive ids; absent or empty means every hive
    hives: Option<String>,
}

impl StreamParams {
    fn hives(&self) -> Vec<String> {
        self.hives
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|hive| !hive.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// SSE handler that establishes a long-lived, push-only connection.
/// Refuses with 401 before any stream bytes when the bearer token is bad.
pub(crate) async fn sse_handler(
    BearerToken(token): BearerToken,
    State(app_state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Error> {
    let Admitted {
        connection,
        mut outbox,
        guard,
    } = app_state.admission.admit_with_interest(
        token.as_deref(),
        ConnectionKind::Unidirectional,
        params.hives(),
    )?;

    debug!(
        "Establishing SSE connection {} for user {}",
        connection.id(),
        connection.identity().id
    );

    let stream = stream! {
        // Dropping the stream (client gone) drops the guard and deregisters
        let _guard = guard;

        loop {
            let item = tokio::select! {
                _ = connection.released() => None,
                item = outbox.recv() => item,
            };

            match item {
                Some(Outbound::Frame(text)) => yield Ok(Event::default().data(text)),
                // The transport keep-alive covers unidirectional liveness
                Some(Outbound::Probe) => continue,
                None => break,
            }
        }

        debug!("SSE connection {} closed", connection.id());
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::define_routes;
    use crate::test_support::{app_state, json_body, token, RecordingPublisher};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::Utc;
    use events::{DomainEvent, EventKind, Payload, Scope};
    use http_body_util::BodyExt;
    use realtime::Dispatcher;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn next_data(body: &mut Body) -> Value {
        let frame = body.frame().await.unwrap().unwrap();
        let bytes = frame.into_data().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn hive_filter_is_split_and_trimmed() {
        let params = StreamParams {
            hives: Some(" h1, ,h2 ".to_string()),
        };
        assert_eq!(params.hives(), vec!["h1", "h2"]);
        assert!(StreamParams::default().hives().is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_refused_with_json_401() {
        let state = app_state(RecordingPublisher::new(true));
        let registry = state.registry.clone();

        let response = define_routes(state)
            .oneshot(
                Request::builder()
                    .uri("/api/sse/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await,
            json!({"success": false, "error": "Authentication required"})
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn invalid_token_is_refused() {
        let state = app_state(RecordingPublisher::new(true));

        let response = define_routes(state)
            .oneshot(
                Request::builder()
                    .uri("/api/sse/events")
                    .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stream_opens_with_greeting_then_carries_filtered_events() {
        let state = app_state(RecordingPublisher::new(true));
        let registry = state.registry.clone();
        let dispatcher = Dispatcher::new(registry.clone());
        let bearer = format!("Bearer {}", token(&state, "u1"));

        let response = define_routes(state)
            .oneshot(
                Request::builder()
                    .uri("/api/sse/events?hives=h1")
                    .header(header::AUTHORIZATION, bearer)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(registry.len(), 1);

        let mut body = response.into_body();
        let greeting = next_data(&mut body).await;
        assert_eq!(greeting["type"], "connection");
        assert_eq!(greeting["message"], "SSE connection established");
        assert_eq!(greeting["user"]["id"], "u1");

        let mut payload = Payload::new();
        payload.insert("hiveId".to_string(), json!("h2"));
        dispatcher.dispatch(&DomainEvent::new(
            EventKind::SensorData,
            Scope::Hive("h2".to_string()),
            payload.clone(),
            Utc::now(),
        ));
        payload.insert("hiveId".to_string(), json!("h1"));
        let report = dispatcher.dispatch(&DomainEvent::new(
            EventKind::HiveStatus,
            Scope::Hive("h1".to_string()),
            payload,
            Utc::now(),
        ));
        assert_eq!(report.succeeded, 1);

        let frame = next_data(&mut body).await;
        assert_eq!(frame["type"], "hive_status");
        assert_eq!(frame["data"], json!({"hiveId": "h1"}));

        drop(body);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn released_connection_ends_the_stream() {
        let state = app_state(RecordingPublisher::new(true));
        let registry = state.registry.clone();
        let bearer = format!("Bearer {}", token(&state, "u1"));

        let response = define_routes(state)
            .oneshot(
                Request::builder()
                    .uri("/api/sse/events")
                    .header(header::AUTHORIZATION, bearer)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let mut body = response.into_body();
        next_data(&mut body).await;

        assert_eq!(registry.release_all(), 1);
        assert!(body.frame().await.is_none());
    }
}
