//! Periodic liveness probing of bidirectional connections.
//!
//! Each tick first evicts every connection still unacknowledged since the
//! previous probe, then clears the alive flag on the rest and probes them. A
//! connection that ignores a probe is therefore gone at the next tick, at
//! most two periods after the probe was sent. Unidirectional connections are
//! never probed.

use crate::connection::{ConnectionId, ConnectionKind, Outbound, Registry};
use crate::error::{Error, ErrorKind};
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// A connection removed by a sweep, with `ProbeTimeout` when it never
/// answered the last ping or `Push(_)` when the ping could not be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct Eviction {
    pub connection_id: ConnectionId,
    pub reason: ErrorKind,
}

/// Outcome of a single sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: Vec<Eviction>,
}

pub struct LivenessMonitor {
    registry: Arc<Registry>,
    period: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<Registry>, period: Duration) -> Self {
        Self {
            registry,
            period: period.max(MIN_PERIOD),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs one probe cycle.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for connection in self.registry.all() {
            if connection.kind() != ConnectionKind::Bidirectional {
                continue;
            }

            let failure = if !connection.begin_probe() {
                Error::new(ErrorKind::ProbeTimeout)
            } else {
                match connection.push(Outbound::Probe) {
                    Ok(()) => {
                        report.probed += 1;
                        continue;
                    }
                    Err(reason) => Error::new(ErrorKind::Push(reason)),
                }
            };

            if self.registry.remove(connection.id()).is_some() {
                warn!("Connection {} terminated: {failure}", connection.id());
                report.evicted.push(Eviction {
                    connection_id: connection.id().clone(),
                    reason: failure.error_kind,
                });
            }
        }

        report
    }

    /// Sweeps every period until `shutdown` is cancelled. The first sweep
    /// happens one full period after start.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            info!("Liveness monitor started (period {:?})", self.period);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let report = self.sweep();
                        if !report.evicted.is_empty() {
                            info!(
                                "Liveness sweep: probed={}, evicted={}",
                                report.probed,
                                report.evicted.len()
                            );
                        } else {
                            trace!("Liveness sweep: probed={}", report.probed);
                        }
                    }
                }
            }

            info!("Liveness monitor stopped");
        })
    }
}
