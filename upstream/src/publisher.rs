//! Outbound publishing towards the broker and the shared connection status.

use crate::error::Error;
use async_trait::async_trait;
use log::*;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of the upstream link, shared through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamStatus {
    pub connected: bool,
    pub broker: String,
}

impl UpstreamStatus {
    pub fn disconnected(broker: impl Into<String>) -> Self {
        Self {
            connected: false,
            broker: broker.into(),
        }
    }
}

pub type StatusSender = watch::Sender<UpstreamStatus>;
pub type StatusReceiver = watch::Receiver<UpstreamStatus>;

pub fn status_channel(broker: impl Into<String>) -> (StatusSender, StatusReceiver) {
    watch::channel(UpstreamStatus::disconnected(broker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// 0, 1 or 2; anything above 2 is treated as 2
    pub qos: u8,
    pub retain: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: 1,
            retain: false,
        }
    }
}

impl PublishOptions {
    fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes a JSON document. While disconnected, or when the client
    /// cannot take another request, this is a logged no-op.
    async fn publish(&self, topic: &str, payload: &Value, options: PublishOptions)
        -> Result<(), Error>;

    fn is_connected(&self) -> bool;
}

/// Publisher backed by a rumqttc client. The connected flag is driven by the
/// event loop in [`crate::mqtt`].
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: &Value,
        options: PublishOptions,
    ) -> Result<(), Error> {
        if !self.is_connected() {
            warn!("MQTT not connected, dropping publish to {topic}");
            return Ok(());
        }

        let body = serde_json::to_vec(payload)?;
        match self
            .client
            .try_publish(topic, options.qos(), options.retain, body)
        {
            Ok(()) => debug!("Published to {topic}"),
            Err(e) => warn!("Dropping publish to {topic}: {}", Error::from(e)),
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
