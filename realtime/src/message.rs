//! Wire encoding of events for each transport family, and the control
//! messages bidirectional clients may send.

use crate::connection::ConnectionKind;
use crate::error::Error;
use chrono::{DateTime, Utc};
use events::{DomainEvent, EventKind, Payload, HIVE_ID_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WS_GREETING: &str = "Connected to Colmena API";
pub const SSE_GREETING: &str = "SSE connection established";

/// Trait for getting the wire `type` of an event on a given transport
pub trait EventType {
    fn event_type(&self, kind: ConnectionKind) -> &'static str;
}

impl EventType for EventKind {
    fn event_type(&self, kind: ConnectionKind) -> &'static str {
        match (self, kind) {
            (EventKind::SensorData, _) => "sensor_data",
            // Dashboards speaking WebSocket expect hive status as system_status
            (EventKind::HiveStatus, ConnectionKind::Bidirectional) => "system_status",
            (EventKind::HiveStatus, ConnectionKind::Unidirectional) => "hive_status",
            (EventKind::OtaStatus, _) => "ota_status",
            (EventKind::Alert, _) => "alert",
            (EventKind::ConnectionAck, ConnectionKind::Bidirectional) => "system_status",
            (EventKind::ConnectionAck, ConnectionKind::Unidirectional) => "connection",
        }
    }
}

/// `{type, payload, timestamp}` envelope used on bidirectional connections.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    payload: &'a Payload,
    timestamp: DateTime<Utc>,
}

/// `{type, data, timestamp}` body of an SSE `data:` line.
#[derive(Debug, Serialize)]
struct StreamFrame<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: &'a Payload,
    timestamp: DateTime<Utc>,
}

/// First SSE frame: the greeting fields sit at the top level.
#[derive(Debug, Serialize)]
struct StreamGreeting<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    message: &'a str,
    user: &'a Value,
    timestamp: DateTime<Utc>,
}

/// Serializes `event` into the text frame for a connection of `kind`.
pub fn encode(event: &DomainEvent, kind: ConnectionKind) -> Result<String, Error> {
    let event_type = event.kind.event_type(kind);

    let json = match (event.kind, kind) {
        (EventKind::ConnectionAck, ConnectionKind::Bidirectional) => {
            let mut payload = Payload::new();
            payload.insert("message".to_string(), Value::from(WS_GREETING));
            payload.extend(event.payload.clone());
            serde_json::to_string(&Envelope {
                event_type,
                payload: &payload,
                timestamp: event.timestamp,
            })?
        }
        (EventKind::ConnectionAck, ConnectionKind::Unidirectional) => {
            serde_json::to_string(&StreamGreeting {
                event_type,
                message: SSE_GREETING,
                user: event.payload.get("user").unwrap_or(&Value::Null),
                timestamp: event.timestamp,
            })?
        }
        (_, ConnectionKind::Bidirectional) => serde_json::to_string(&Envelope {
            event_type,
            payload: &event.payload,
            timestamp: event.timestamp,
        })?,
        (_, ConnectionKind::Unidirectional) => serde_json::to_string(&StreamFrame {
            event_type,
            data: &event.payload,
            timestamp: event.timestamp,
        })?,
    };

    Ok(json)
}

/// Control messages a bidirectional client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "hiveId")]
        hive_id: String,
    },
    Unsubscribe {
        #[serde(rename = "hiveId")]
        hive_id: String,
    },
    Ping,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Replies to client control messages, sent only to the asking connection.
pub fn control_reply(reply_type: &str, hive_id: Option<&str>) -> Result<String, Error> {
    let mut payload = Payload::new();
    if let Some(hive_id) = hive_id {
        payload.insert(HIVE_ID_KEY.to_string(), Value::from(hive_id));
    }

    Ok(serde_json::to_string(&Envelope {
        event_type: reply_type,
        payload: &payload,
        timestamp: Utc::now(),
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use events::{Identity, Scope};
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sensor_event() -> DomainEvent {
        let payload = json!({"hiveId": "hive-7", "t": 21.3});
        DomainEvent::new(
            EventKind::SensorData,
            Scope::Hive("hive-7".to_string()),
            payload.as_object().unwrap().clone(),
            at(),
        )
    }

    fn parse(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn bidirectional_envelope_uses_payload_key() {
        let frame = encode(&sensor_event(), ConnectionKind::Bidirectional).unwrap();
        assert_eq!(
            parse(&frame),
            json!({
                "type": "sensor_data",
                "payload": {"hiveId": "hive-7", "t": 21.3},
                "timestamp": "2024-05-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn unidirectional_frame_uses_data_key() {
        let frame = encode(&sensor_event(), ConnectionKind::Unidirectional).unwrap();
        assert_eq!(
            parse(&frame),
            json!({
                "type": "sensor_data",
                "data": {"hiveId": "hive-7", "t": 21.3},
                "timestamp": "2024-05-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn hive_status_type_differs_per_transport() {
        assert_eq!(
            EventKind::HiveStatus.event_type(ConnectionKind::Bidirectional),
            "system_status"
        );
        assert_eq!(
            EventKind::HiveStatus.event_type(ConnectionKind::Unidirectional),
            "hive_status"
        );
    }

    #[test]
    fn acks_carry_greeting_and_user() {
        let identity = Identity {
            id: "u1".to_string(),
            username: "maya".to_string(),
            role: "user".to_string(),
        };
        let ack = DomainEvent::connection_ack(&identity);

        let ws = parse(&encode(&ack, ConnectionKind::Bidirectional).unwrap());
        assert_eq!(ws["type"], "system_status");
        assert_eq!(ws["payload"]["message"], WS_GREETING);
        assert_eq!(ws["payload"]["user"]["username"], "maya");

        let sse = parse(&encode(&ack, ConnectionKind::Unidirectional).unwrap());
        assert_eq!(sse["type"], "connection");
        assert_eq!(sse["message"], SSE_GREETING);
        assert_eq!(sse["user"]["id"], "u1");
        assert!(sse.get("data").is_none());
    }

    #[test]
    fn client_messages_parse() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe","hiveId":"hive-1"}"#).unwrap(),
            ClientMessage::Subscribe {
                hive_id: "hive-1".to_string()
            }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert!(ClientMessage::parse(r#"{"type":"launch"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn control_reply_includes_hive_when_given() {
        let reply = parse(&control_reply("subscribed", Some("hive-1")).unwrap());
        assert_eq!(reply["type"], "subscribed");
        assert_eq!(reply["payload"], json!({"hiveId": "hive-1"}));

        let pong = parse(&control_reply("pong", None).unwrap());
        assert_eq!(pong["payload"], json!({}));
    }
}
