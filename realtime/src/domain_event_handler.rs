use crate::dispatcher::Dispatcher;
use async_trait::async_trait;
use events::{DomainEvent, EventHandler};
use log::*;
use std::sync::Arc;

/// Hands domain events published by the upstream relay to the dispatcher.
///
/// The dispatcher already isolates per-connection failures; this handler only
/// surfaces the pass outcome in the logs.
pub struct RealtimeEventHandler {
    dispatcher: Arc<Dispatcher>,
}

impl RealtimeEventHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl EventHandler for RealtimeEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        let report = self.dispatcher.dispatch(event);

        if report.failed.is_empty() {
            debug!(
                "Delivered {} ({}) to {} connection(s)",
                event.kind, event.scope, report.succeeded
            );
        } else {
            warn!(
                "Delivered {} ({}) to {}/{} connection(s); dropped {:?}",
                event.kind,
                event.scope,
                report.succeeded,
                report.attempted,
                report.failed_ids()
            );
        }
    }
}
