//! Single consumer that turns upstream notifications into published domain
//! events. Messages are handled one at a time in arrival order.

use crate::publisher::StatusSender;
use crate::router::TopicRouter;
use bytes::Bytes;
use events::EventPublisher;
use log::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Notifications produced by a broker adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Bytes },
    Error(String),
}

pub struct Relay {
    router: Arc<TopicRouter>,
    publisher: EventPublisher,
    status: StatusSender,
}

impl Relay {
    pub fn new(router: Arc<TopicRouter>, publisher: EventPublisher, status: StatusSender) -> Self {
        Self {
            router,
            publisher,
            status,
        }
    }

    /// Runs until the channel closes or `shutdown` is cancelled.
    pub async fn run(self, mut rx: mpsc::Receiver<UpstreamEvent>, shutdown: CancellationToken) {
        info!("Upstream relay started");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }
        self.set_connected(false);
        info!("Upstream relay stopped");
    }

    pub async fn handle(&self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Connected => {
                info!("Upstream connected");
                self.set_connected(true);
            }
            UpstreamEvent::Disconnected => {
                warn!("Upstream disconnected");
                self.set_connected(false);
            }
            UpstreamEvent::Error(message) => {
                error!("Upstream error: {message}");
            }
            UpstreamEvent::Message { topic, payload } => {
                for event in self.router.route(&topic, &payload) {
                    debug!("Relaying {} event for {}", event.kind, event.scope);
                    self.publisher.publish(event).await;
                }
            }
        }
    }

    fn set_connected(&self, connected: bool) {
        self.status.send_if_modified(|status| {
            let changed = status.connected != connected;
            status.connected = connected;
            changed
        });
    }
}
