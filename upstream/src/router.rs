//! Maps raw upstream `(topic, payload)` pairs onto domain events.
//!
//! Only four shapes are recognized:
//!
//! | topic                     | event         | scope       |
//! |---------------------------|---------------|-------------|
//! | `{prefix}/{hive}/sensors` | `sensor_data` | `Hive(hive)`|
//! | `{prefix}/{hive}/status`  | `hive_status` | `Hive(hive)`|
//! | `{prefix}/{hive}/ota`     | `ota_status`  | `Hive(hive)`|
//! | `{alerts}` (exact)        | `alert`       | `Broadcast` |
//!
//! Anything else is dropped silently. A recognized topic whose payload is not
//! a JSON object is dropped and counted as malformed.

use crate::error::{Error, ErrorKind};
use chrono::{DateTime, Utc};
use events::{DomainEvent, EventKind, Payload, Scope, HIVE_ID_KEY};
use log::*;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_HIVE_PREFIX: &str = "colmena/hives";
pub const DEFAULT_ALERTS_TOPIC: &str = "colmena/alerts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    Hive { hive_id: &'a str, kind: EventKind },
    Alerts,
}

pub struct TopicRouter {
    hive_prefix: String,
    alerts_topic: String,
    malformed: AtomicU64,
}

impl TopicRouter {
    pub fn new(hive_prefix: impl Into<String>, alerts_topic: impl Into<String>) -> Self {
        Self {
            hive_prefix: hive_prefix.into().trim_end_matches('/').to_string(),
            alerts_topic: alerts_topic.into(),
            malformed: AtomicU64::new(0),
        }
    }

    /// MQTT filters that cover every routable topic.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            format!("{}/+/sensors", self.hive_prefix),
            format!("{}/+/status", self.hive_prefix),
            format!("{}/+/ota", self.hive_prefix),
            self.alerts_topic.clone(),
        ]
    }

    /// Topic an outbound command for `hive_id` is published on.
    pub fn command_topic(&self, hive_id: &str) -> String {
        format!("{}/{hive_id}/commands", self.hive_prefix)
    }

    /// Routes with the current time as event timestamp.
    pub fn route(&self, topic: &str, raw_payload: &[u8]) -> Vec<DomainEvent> {
        self.route_at(topic, raw_payload, Utc::now())
    }

    /// Routes with an explicit timestamp. Same inputs, same output.
    pub fn route_at(&self, topic: &str, raw_payload: &[u8], now: DateTime<Utc>) -> Vec<DomainEvent> {
        let Some(route) = self.match_topic(topic) else {
            trace!("Ignoring message on unrouted topic {topic}");
            return Vec::new();
        };

        let payload = match Self::parse_payload(raw_payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping malformed payload on {topic}: {e}");
                return Vec::new();
            }
        };

        let event = match route {
            Route::Hive { hive_id, kind } => {
                // The topic's hive id wins over any hiveId in the body
                let mut merged = Payload::with_capacity(payload.len() + 1);
                merged.insert(HIVE_ID_KEY.to_string(), Value::from(hive_id));
                merged.extend(payload.into_iter().filter(|(key, _)| key != HIVE_ID_KEY));
                DomainEvent::new(kind, Scope::Hive(hive_id.to_string()), merged, now)
            }
            Route::Alerts => DomainEvent::new(EventKind::Alert, Scope::Broadcast, payload, now),
        };

        vec![event]
    }

    /// Number of payloads dropped as malformed since construction.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    fn match_topic<'a>(&self, topic: &'a str) -> Option<Route<'a>> {
        if topic == self.alerts_topic {
            return Some(Route::Alerts);
        }

        let rest = topic
            .strip_prefix(self.hive_prefix.as_str())?
            .strip_prefix('/')?;
        let mut segments = rest.split('/');
        let hive_id = segments.next().filter(|id| !id.is_empty())?;

        let kind = match segments.next()? {
            "sensors" => EventKind::SensorData,
            "status" => EventKind::HiveStatus,
            "ota" => EventKind::OtaStatus,
            _ => return None,
        };

        Some(Route::Hive { hive_id, kind })
    }

    fn parse_payload(raw_payload: &[u8]) -> Result<Payload, Error> {
        match serde_json::from_slice::<Value>(raw_payload)? {
            Value::Object(payload) => Ok(payload),
            _ => Err(Error::new(ErrorKind::MalformedPayload)),
        }
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new(DEFAULT_HIVE_PREFIX, DEFAULT_ALERTS_TOPIC)
    }
}
