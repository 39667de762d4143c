use crate::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use log::*;
use realtime::error::{AuthErrorKind, PushErrorKind};
use realtime::message::{control_reply, ClientMessage};
use realtime::{Admitted, Connection, ConnectionKind, Outbound, Registry};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub(crate) struct SocketParams {
    token: Option<String>,
}

/// Upgrades the request; the token is checked on the open socket so a
/// refusal can be reported with a policy close frame.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<SocketParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, params.token))
}

fn close_reason(err: &realtime::Error) -> &'static str {
    match err.auth() {
        Some(AuthErrorKind::Missing) => "Authentication required",
        _ => "Invalid token",
    }
}

async fn handle_socket(mut socket: WebSocket, app_state: AppState, token: Option<String>) {
    let Admitted {
        connection,
        mut outbox,
        guard,
    } = match app_state
        .admission
        .admit(token.as_deref(), ConnectionKind::Bidirectional)
    {
        Ok(admitted) => admitted,
        Err(e) => {
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: close_reason(&e).into(),
            };
            if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                debug!("Failed to send policy close frame: {e}");
            }
            return;
        }
    };

    let push_timeout = app_state.config.push_timeout();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = connection.released() => {
                debug!("Connection {} released, closing socket", connection.id());
                break;
            }

            // Frames queued by the dispatcher, replies and liveness probes
            item = outbox.recv() => {
                let message = match item {
                    Some(Outbound::Frame(text)) => Message::Text(text),
                    Some(Outbound::Probe) => Message::Ping(Vec::new()),
                    None => break,
                };

                if let Err(reason) = send_within(&mut ws_tx, message, push_timeout).await {
                    warn!("Connection {}: push failed ({reason}), dropping client", connection.id());
                    break;
                }
            }

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Pong(_))) => connection.acknowledge(),
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&app_state.registry, &connection, &text)
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Connection {}: client closed", connection.id());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection {}: websocket error: {e}", connection.id());
                    break;
                }
            },
        }
    }

    drop(guard);
    let _ = ws_tx.close().await;
}

/// Writes one message, failing with `Timeout` when the write takes longer
/// than `limit` and `Closed` when the transport errors.
async fn send_within<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), PushErrorKind>
where
    S: Sink<Message> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(PushErrorKind::Closed),
        Err(_) => Err(PushErrorKind::Timeout),
    }
}

/// Applies a client control frame. Replies go through the connection's own
/// outbox so they stay ordered with dispatched events.
fn handle_client_message(registry: &Registry, connection: &Connection, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Connection {}: ignoring client frame: {e}", connection.id());
            return;
        }
    };

    let reply = match &message {
        ClientMessage::Subscribe { hive_id } => {
            registry.subscribe(connection.id(), hive_id);
            control_reply("subscribed", Some(hive_id))
        }
        ClientMessage::Unsubscribe { hive_id } => {
            registry.unsubscribe(connection.id(), hive_id);
            control_reply("unsubscribed", Some(hive_id))
        }
        ClientMessage::Ping => control_reply("pong", None),
    };

    match reply {
        Ok(text) => {
            if let Err(reason) = connection.push(Outbound::Frame(text)) {
                warn!(
                    "Connection {}: could not reply to {message:?}: {reason}",
                    connection.id()
                );
            }
        }
        Err(e) => error!("Failed to encode control reply: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{app_state, identity, spawn_server, token, RecordingPublisher};
    use realtime::error::ErrorKind;
    use realtime::LivenessMonitor;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const WAIT: Duration = Duration::from_secs(3);

    async fn next_message(client: &mut Client) -> Option<WsMessage> {
        tokio::time::timeout(WAIT, client.next())
            .await
            .expect("no websocket message in time")
            .and_then(|message| message.ok())
    }

    async fn next_json(client: &mut Client) -> Value {
        match next_message(client).await {
            Some(WsMessage::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn registered(registry: &Registry) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (connection, outbox) = Connection::new(identity("u1"), ConnectionKind::Bidirectional, 4);
        registry.register(connection.clone()).unwrap();
        (connection, outbox)
    }

    fn reply(outbox: &mut mpsc::Receiver<Outbound>) -> Value {
        match outbox.try_recv().unwrap() {
            Outbound::Frame(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Probe => panic!("expected a frame"),
        }
    }

    #[test]
    fn close_reason_distinguishes_missing_from_invalid() {
        let missing = realtime::Error::new(ErrorKind::Auth(AuthErrorKind::Missing));
        let invalid = realtime::Error::new(ErrorKind::Auth(AuthErrorKind::Invalid));
        assert_eq!(close_reason(&missing), "Authentication required");
        assert_eq!(close_reason(&invalid), "Invalid token");
    }

    #[test]
    fn subscribe_narrows_interest_and_replies() {
        let registry = Registry::new();
        let (connection, mut outbox) = registered(&registry);

        handle_client_message(&registry, &connection, r#"{"type":"subscribe","hiveId":"h1"}"#);

        assert!(connection.interested_in("h1"));
        assert!(!connection.interested_in("h2"));
        let frame = reply(&mut outbox);
        assert_eq!(frame["type"], "subscribed");
        assert_eq!(frame["payload"]["hiveId"], "h1");

        handle_client_message(&registry, &connection, r#"{"type":"unsubscribe","hiveId":"h1"}"#);
        assert!(connection.interested_in("h2"));
        assert_eq!(reply(&mut outbox)["type"], "unsubscribed");
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let registry = Registry::new();
        let (connection, mut outbox) = registered(&registry);

        handle_client_message(&registry, &connection, r#"{"type":"ping"}"#);

        assert_eq!(reply(&mut outbox)["type"], "pong");
    }

    #[test]
    fn unparseable_frames_are_ignored() {
        let registry = Registry::new();
        let (connection, mut outbox) = registered(&registry);

        handle_client_message(&registry, &connection, "hello");
        handle_client_message(&registry, &connection, r#"{"type":"dance"}"#);

        assert!(outbox.try_recv().is_err());
        assert!(registry.contains(connection.id()));
    }

    #[tokio::test]
    async fn send_within_reports_timeout_and_closed() {
        // A zero-buffer channel accepts one message, then blocks until read
        let (mut blocked, _rx) = futures::channel::mpsc::channel::<Message>(0);
        send_within(&mut blocked, Message::Ping(Vec::new()), WAIT)
            .await
            .unwrap();
        assert_eq!(
            send_within(&mut blocked, Message::Ping(Vec::new()), Duration::from_millis(20)).await,
            Err(PushErrorKind::Timeout)
        );

        let (mut closed, rx) = futures::channel::mpsc::channel::<Message>(0);
        drop(rx);
        assert_eq!(
            send_within(&mut closed, Message::Ping(Vec::new()), WAIT).await,
            Err(PushErrorKind::Closed)
        );
    }

    #[tokio::test]
    async fn refused_handshakes_get_a_policy_close() {
        let state = app_state(RecordingPublisher::new(true));
        let registry = state.registry.clone();
        let (addr, shutdown, _server) = spawn_server(state).await;

        for (query, reason) in [
            ("", "Authentication required"),
            ("?token=", "Authentication required"),
            ("?token=garbage", "Invalid token"),
        ] {
            let (mut client, _) = connect_async(format!("ws://{addr}/ws{query}"))
                .await
                .unwrap();
            match next_message(&mut client).await {
                Some(WsMessage::Close(Some(frame))) => {
                    assert_eq!(frame.code, CloseCode::Policy);
                    assert_eq!(u16::from(frame.code), 1008);
                    assert_eq!(frame.reason, reason);
                }
                other => panic!("expected a close frame for {query:?}, got {other:?}"),
            }
        }

        assert!(registry.is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn answered_pings_keep_the_connection() {
        let state = app_state(RecordingPublisher::new(true));
        let registry = state.registry.clone();
        let bearer = token(&state, "u1");
        let (addr, shutdown, server) = spawn_server(state).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws?token={bearer}"))
            .await
            .unwrap();
        let ack = next_json(&mut client).await;
        assert_eq!(ack["type"], "system_status");
        assert_eq!(ack["payload"]["message"], "Connected to Colmena API");
        assert_eq!(ack["payload"]["user"]["id"], "u1");

        let connection = registry.all().pop().unwrap();
        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30));

        for _ in 0..2 {
            let report = monitor.sweep();
            assert_eq!(report.probed, 1);
            assert!(report.evicted.is_empty());
            assert!(!connection.is_alive());

            match next_message(&mut client).await {
                Some(WsMessage::Ping(_)) => {}
                other => panic!("expected a ping, got {other:?}"),
            }
            // Reading the ping queued the pong; flushing sends it
            client.flush().await.unwrap();
            wait_until(|| connection.is_alive()).await;
        }

        assert!(registry.contains(connection.id()));

        shutdown.cancel();
        tokio::time::timeout(WAIT, server).await.unwrap().unwrap().unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unanswered_ping_closes_the_socket() {
        let state = app_state(RecordingPublisher::new(true));
        let registry = state.registry.clone();
        let bearer = token(&state, "u1");
        let (addr, shutdown, _server) = spawn_server(state).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws?token={bearer}"))
            .await
            .unwrap();
        next_json(&mut client).await;

        let monitor = LivenessMonitor::new(registry.clone(), Duration::from_secs(30));
        assert_eq!(monitor.sweep().probed, 1);
        // The client never reads, so no pong goes back
        assert_eq!(monitor.sweep().evicted.len(), 1);
        assert!(registry.is_empty());

        loop {
            match next_message(&mut client).await {
                Some(WsMessage::Ping(_)) => continue,
                Some(WsMessage::Close(_)) | None => break,
                other => panic!("unexpected message {other:?}"),
            }
        }
        shutdown.cancel();
    }

    #[tokio::test]
    async fn socket_subscription_round_trip() {
        let state = app_state(RecordingPublisher::new(true));
        let registry = state.registry.clone();
        let bearer = token(&state, "u1");
        let (addr, shutdown, _server) = spawn_server(state).await;

        let (mut client, _) = connect_async(format!("ws://{addr}/ws?token={bearer}"))
            .await
            .unwrap();
        next_json(&mut client).await;

        client
            .send(WsMessage::Text(r#"{"type":"subscribe","hiveId":"h3"}"#.into()))
            .await
            .unwrap();
        let reply = next_json(&mut client).await;
        assert_eq!(reply["type"], "subscribed");
        assert_eq!(reply["payload"]["hiveId"], "h3");

        let connection = registry.all().pop().unwrap();
        assert_eq!(connection.hives(), vec!["h3".to_string()]);

        client
            .send(WsMessage::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut client).await["type"], "pong");

        shutdown.cancel();
    }
}
