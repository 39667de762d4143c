//! rumqttc adapter: owns the event loop, keeps subscriptions alive across
//! reconnects and forwards everything as [`UpstreamEvent`]s.

use crate::error::Error;
use crate::publisher::MqttPublisher;
use crate::relay::UpstreamEvent;
use log::*;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub reconnect_period: Duration,
    pub subscriptions: Vec<String>,
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        options
    }
}

pub struct MqttAdapter {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    settings: MqttSettings,
}

impl MqttAdapter {
    /// Builds the adapter and the publisher that shares its client.
    /// Nothing touches the network until [`MqttAdapter::run`] is polled.
    pub fn new(settings: MqttSettings) -> (Self, MqttPublisher) {
        let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let publisher = MqttPublisher::new(client.clone(), connected.clone());

        (
            Self {
                client,
                eventloop,
                connected,
                settings,
            },
            publisher,
        )
    }

    pub fn broker(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    pub async fn run(mut self, tx: mpsc::Sender<UpstreamEvent>, shutdown: CancellationToken) {
        info!("Connecting to MQTT broker at {}", self.broker());

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            let forwarded = match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.connected.store(true, Ordering::Release);
                    self.subscribe_all();
                    tx.send(UpstreamEvent::Connected).await
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    tx.send(UpstreamEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    })
                    .await
                }
                Ok(_) => Ok(()),
                Err(e) => {
                    let err = Error::from(e);
                    debug!("MQTT connection error: {err}");
                    let was_connected = self.connected.swap(false, Ordering::AcqRel);

                    let mut forwarded = tx.send(UpstreamEvent::Error(err.to_string())).await;
                    if forwarded.is_ok() && was_connected {
                        forwarded = tx.send(UpstreamEvent::Disconnected).await;
                    }

                    if forwarded.is_ok() {
                        debug!(
                            "Retrying MQTT connection in {:?}",
                            self.settings.reconnect_period
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.settings.reconnect_period) => {}
                        }
                    }
                    forwarded
                }
            };

            if forwarded.is_err() {
                warn!("Upstream relay is gone, stopping MQTT loop");
                break;
            }
        }

        self.connected.store(false, Ordering::Release);
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect failed: {e}");
        }
        info!("MQTT loop stopped");
    }

    fn subscribe_all(&self) {
        for filter in &self.settings.subscriptions {
            match self.client.try_subscribe(filter, QoS::AtLeastOnce) {
                Ok(()) => info!("Subscribed to {filter}"),
                Err(e) => error!("Failed to subscribe to {filter}: {}", Error::from(e)),
            }
        }
    }
}
