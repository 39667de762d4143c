//! WebSocket endpoint: bidirectional connections with ping/pong liveness and
//! client-driven hive subscriptions.

pub(crate) mod handler;
