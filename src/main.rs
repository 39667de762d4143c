//! Colmena real-time gateway: relays hive telemetry from the MQTT broker to
//! WebSocket and SSE clients.

use domain::jwt::JwtVerifier;
use events::EventPublisher;
use log::*;
use realtime::{Dispatcher, LivenessMonitor, RealtimeEventHandler, Registry};
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use upstream::{status_channel, MqttAdapter, MqttSettings, Relay, TopicRouter};

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config).expect("logger is initialised once at startup");

    info!(
        "Starting Colmena gateway v{} [{}]",
        env!("CARGO_PKG_VERSION"),
        config.runtime_env
    );

    if config.is_production() && config.uses_default_jwt_secret() {
        error!("JWT_SECRET must be set to a non-default value in production");
        std::process::exit(1);
    }

    let shutdown = CancellationToken::new();

    let registry = Arc::new(Registry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
    let event_publisher =
        EventPublisher::new().with_handler(Arc::new(RealtimeEventHandler::new(dispatcher.clone())));

    // Upstream: MQTT event loop -> bounded channel -> relay -> dispatcher
    let topic_router = Arc::new(TopicRouter::new(
        config.mqtt_hive_topic_prefix.clone(),
        config.mqtt_alerts_topic.clone(),
    ));
    let (adapter, mqtt_publisher) = MqttAdapter::new(MqttSettings {
        client_id: config.mqtt_client_id(),
        host: config.mqtt_broker_host.clone(),
        port: config.mqtt_broker_port,
        credentials: config.mqtt_credentials(),
        reconnect_period: config.mqtt_reconnect_period(),
        subscriptions: topic_router.subscriptions(),
    });
    let (status_tx, status_rx) = status_channel(config.mqtt_broker());
    let (upstream_tx, upstream_rx) = mpsc::channel(config.upstream_channel_capacity.max(1));

    let relay = Relay::new(topic_router.clone(), event_publisher, status_tx);
    let relay_task = tokio::spawn(relay.run(upstream_rx, shutdown.clone()));
    let mqtt_task = tokio::spawn(adapter.run(upstream_tx, shutdown.clone()));

    let liveness_task =
        LivenessMonitor::new(registry.clone(), config.liveness_interval()).spawn(shutdown.clone());

    let app_state = web::AppState::new(
        config.clone(),
        &dispatcher,
        Arc::new(JwtVerifier::new(config.jwt_secret())),
        Arc::new(mqtt_publisher),
        topic_router,
        status_rx,
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {e}"),
        }
        signal_token.cancel();
    });

    if let Err(e) = web::init_server(app_state, shutdown.clone()).await {
        error!("Server failed: {e}");
    }

    // No-op after a graceful shutdown; matters when the server failed
    shutdown.cancel();
    registry.release_all();

    for (name, task) in [
        ("relay", relay_task),
        ("mqtt", mqtt_task),
        ("liveness", liveness_task),
    ] {
        if let Err(e) = task.await {
            warn!("{name} task ended abnormally: {e}");
        }
    }

    info!("Colmena gateway stopped");
}
