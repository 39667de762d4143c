//! Event system infrastructure for the Colmena gateway.
//!
//! This crate provides the normalized event model shared by the upstream relay
//! and the real-time delivery layer, plus the in-process publisher that hands
//! each event to its registered handlers.
//!
//! # Architecture
//!
//! - **DomainEvent**: A normalized application event (sensor data, hive status,
//!   OTA status, alert or connection acknowledgement)
//! - **Scope**: Who an event is addressed to (everyone, one hive, one user)
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Sensor-specific data is carried as an ordered JSON mapping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Ordered mapping from field name to a tagged JSON value.
pub type Payload = Map<String, Value>;

/// Key under which the hive identifier is merged into hive-scoped payloads.
pub const HIVE_ID_KEY: &str = "hiveId";

/// The authenticated principal attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub role: String,
}

/// Application-level taxonomy of events, independent of upstream topic syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SensorData,
    HiveStatus,
    OtaStatus,
    Alert,
    ConnectionAck,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SensorData => "sensor_data",
            EventKind::HiveStatus => "hive_status",
            EventKind::OtaStatus => "ota_status",
            EventKind::Alert => "alert",
            EventKind::ConnectionAck => "connection_ack",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing target of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every registered connection
    Broadcast,
    /// Connections interested in a single hive
    Hive(String),
    /// Every connection opened by one user
    User(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scope::Broadcast => write!(f, "broadcast"),
            Scope::Hive(hive_id) => write!(f, "hive:{hive_id}"),
            Scope::User(user_id) => write!(f, "user:{user_id}"),
        }
    }
}

/// A normalized event. It only lives for the duration of one dispatch pass.
///
/// `timestamp` is stamped once where the event is created and never rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub scope: Scope,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, scope: Scope, payload: Payload, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            scope,
            payload,
            timestamp,
        }
    }

    /// Builds the acknowledgement pushed to a freshly admitted connection.
    /// The payload carries the identity under `user`; wire encoders add the
    /// transport-specific greeting.
    pub fn connection_ack(identity: &Identity) -> Self {
        let mut payload = Payload::new();
        payload.insert(
            "user".to_string(),
            serde_json::to_value(identity).unwrap_or(Value::Null),
        );

        Self::new(
            EventKind::ConnectionAck,
            Scope::User(identity.id.clone()),
            payload,
            Utc::now(),
        )
    }

    /// The hive this event targets, if it is hive-scoped.
    pub fn hive_id(&self) -> Option<&str> {
        match &self.scope {
            Scope::Hive(hive_id) => Some(hive_id),
            _ => None,
        }
    }
}

/// Trait for handling domain events.
/// Implementations perform side effects such as pushing to live connections.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers, in order.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
