//! HTTP surface of the gateway: the WebSocket and SSE endpoints, health and
//! status reporting, and the hive command endpoint.

use axum::http::{header, HeaderValue, Method};
use domain::jwt::TokenVerifier;
use log::*;
use realtime::{Admission, Dispatcher, Registry};
use service::config::Config;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use upstream::{Publisher, StatusReceiver, TopicRouter};

pub(crate) mod controller;
pub mod error;
pub(crate) mod extractors;
pub mod router;
pub(crate) mod sse;
pub(crate) mod ws;

pub use error::{Error, Result};

// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub admission: Arc<Admission>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub publisher: Arc<dyn Publisher>,
    pub topic_router: Arc<TopicRouter>,
    pub upstream_status: StatusReceiver,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        dispatcher: &Arc<Dispatcher>,
        verifier: Arc<dyn TokenVerifier>,
        publisher: Arc<dyn Publisher>,
        topic_router: Arc<TopicRouter>,
        upstream_status: StatusReceiver,
    ) -> Self {
        let admission = Admission::new(
            verifier.clone(),
            dispatcher.clone(),
            config.connection_outbox_capacity,
        );

        Self {
            registry: dispatcher.registry().clone(),
            admission: Arc::new(admission),
            verifier,
            publisher,
            topic_router,
            upstream_status,
            started_at: Instant::now(),
            config,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Binds the configured interface and serves until `shutdown` is cancelled.
pub async fn init_server(app_state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let host = app_state
        .config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let server_url = format!("{host}:{}", app_state.config.port);

    let listener = TcpListener::bind(&server_url).await?;
    info!("Server starting... listening for connections on http://{server_url}");

    serve(listener, app_state, shutdown).await
}

/// Serves on an already bound listener. Cancelling `shutdown` releases every
/// registered connection first, so open sockets and event streams end and
/// the graceful shutdown can complete.
pub async fn serve(
    listener: TcpListener,
    app_state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let cors = cors_layer(&app_state.config);
    let registry = app_state.registry.clone();

    axum::serve(listener, router::define_routes(app_state).layer(cors))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            let released = registry.release_all();
            info!("Shutting down, released {released} open connections");
        })
        .await
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_credentials(true)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(origins)
}
