//! Real-time fan-out of upstream hive events to WebSocket and SSE clients.
//!
//! # Architecture
//!
//! - **Registry**: the only shared mutable state. A `DashMap` of live
//!   connections keyed by id, with a secondary index by user id.
//! - **Dispatcher**: resolves an event's scope to connections and pushes a
//!   transport-specific frame to each, evicting any that fail.
//! - **LivenessMonitor**: pings bidirectional connections every period and
//!   evicts the ones that stop answering.
//! - **Admission**: verifies the handshake credential, registers the
//!   connection and queues its acknowledgement.
//!
//! # Message Flow
//!
//! 1. A client connects; the web layer calls `Admission::admit` with the
//!    presented token
//! 2. The connection is registered and its transport task starts draining
//!    the connection's bounded outbox
//! 3. The upstream relay publishes a `DomainEvent`; `RealtimeEventHandler`
//!    passes it to `Dispatcher::dispatch`
//! 4. Each target gets a frame through `try_send`; full or closed outboxes
//!    are reported in the `DispatchReport` and the connection is removed
//! 5. Removal cancels the connection, and its transport task closes the
//!    socket or stream
//!
//! Events are ephemeral: a client that is not connected misses them, and
//! duplicates redelivered upstream are passed through as-is.

pub mod admission;
pub mod connection;
pub mod dispatcher;
pub mod domain_event_handler;
pub mod error;
pub mod liveness;
pub mod message;

pub use admission::{Admission, Admitted};
pub use connection::{Connection, ConnectionId, ConnectionKind, Outbound, RegistrationGuard, Registry};
pub use dispatcher::{DispatchReport, DispatchStats, Dispatcher, FailedPush};
pub use domain_event_handler::RealtimeEventHandler;
pub use error::{Error, ErrorKind};
pub use liveness::{Eviction, LivenessMonitor, SweepReport};
