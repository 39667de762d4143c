use crate::connection::{Connection, ConnectionId, ConnectionKind, Outbound, Registry};
use crate::error::PushErrorKind;
use crate::message;
use events::DomainEvent;
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A connection that could not be reached during a dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPush {
    pub connection_id: ConnectionId,
    pub reason: PushErrorKind,
}

/// Outcome of one dispatch pass. Failures are reported, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedPush>,
}

impl DispatchReport {
    pub fn failed_ids(&self) -> Vec<&ConnectionId> {
        self.failed.iter().map(|f| &f.connection_id).collect()
    }
}

/// Running totals across all dispatch passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub events: u64,
    pub pushes_succeeded: u64,
    pub pushes_failed: u64,
}

/// Fans a `DomainEvent` out to every matching connection.
///
/// Pushes never wait: each one is a `try_send` into the target's bounded
/// outbox, so a slow consumer fails on its own without stalling the rest.
/// Any failed target is removed from the registry before `dispatch` returns.
pub struct Dispatcher {
    registry: Arc<Registry>,
    events: AtomicU64,
    pushes_succeeded: AtomicU64,
    pushes_failed: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            events: AtomicU64::new(0),
            pushes_succeeded: AtomicU64::new(0),
            pushes_failed: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatch(&self, event: &DomainEvent) -> DispatchReport {
        self.events.fetch_add(1, Ordering::Relaxed);

        let targets = self.registry.lookup(&event.scope);
        let mut report = DispatchReport {
            attempted: targets.len(),
            ..Default::default()
        };

        // Encode at most once per transport family
        let mut bidirectional: Option<Result<String, PushErrorKind>> = None;
        let mut unidirectional: Option<Result<String, PushErrorKind>> = None;

        for connection in targets {
            let slot = match connection.kind() {
                ConnectionKind::Bidirectional => &mut bidirectional,
                ConnectionKind::Unidirectional => &mut unidirectional,
            };
            let frame = slot.get_or_insert_with(|| Self::encode(event, connection.kind()));

            let outcome = match frame {
                Ok(frame) => connection.push(Outbound::Frame(frame.clone())),
                Err(reason) => Err(*reason),
            };

            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(reason) => {
                    self.evict(&connection, reason);
                    report.failed.push(FailedPush {
                        connection_id: connection.id().clone(),
                        reason,
                    });
                }
            }
        }

        self.pushes_succeeded
            .fetch_add(report.succeeded as u64, Ordering::Relaxed);
        self.pushes_failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);

        trace!(
            "Dispatched {} to {}: attempted={}, succeeded={}, failed={}",
            event.kind,
            event.scope,
            report.attempted,
            report.succeeded,
            report.failed.len()
        );

        report
    }

    /// Pushes `event` to a single connection, bypassing scope lookup. Used for
    /// per-connection acknowledgements. A failure evicts the connection.
    pub fn deliver(&self, connection: &Connection, event: &DomainEvent) -> Result<(), PushErrorKind> {
        let outcome = Self::encode(event, connection.kind())
            .and_then(|frame| connection.push(Outbound::Frame(frame)));

        match outcome {
            Ok(()) => {
                self.pushes_succeeded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(reason) => {
                self.pushes_failed.fetch_add(1, Ordering::Relaxed);
                self.evict(connection, reason);
                Err(reason)
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            events: self.events.load(Ordering::Relaxed),
            pushes_succeeded: self.pushes_succeeded.load(Ordering::Relaxed),
            pushes_failed: self.pushes_failed.load(Ordering::Relaxed),
        }
    }

    fn encode(event: &DomainEvent, kind: ConnectionKind) -> Result<String, PushErrorKind> {
        message::encode(event, kind).map_err(|e| {
            error!("Failed to serialize {} event: {e}", event.kind);
            PushErrorKind::Serialization
        })
    }

    fn evict(&self, connection: &Connection, reason: PushErrorKind) {
        if self.registry.remove(connection.id()).is_some() {
            warn!(
                "Push to connection {} failed ({reason}); connection removed",
                connection.id()
            );
        }
    }
}
