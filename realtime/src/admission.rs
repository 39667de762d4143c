use crate::connection::{Connection, ConnectionKind, Outbound, RegistrationGuard, Registry};
use crate::dispatcher::Dispatcher;
use crate::error::{AuthErrorKind, Error, ErrorKind};
use domain::jwt::TokenVerifier;
use events::DomainEvent;
use log::*;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A connection that passed the handshake.
///
/// The transport task keeps all three parts for the lifetime of the socket
/// or stream: it drains `outbox`, reports pongs on `connection`, and drops
/// `guard` on exit to deregister.
pub struct Admitted {
    pub connection: Arc<Connection>,
    pub outbox: mpsc::Receiver<Outbound>,
    pub guard: RegistrationGuard,
}

/// Authenticates inbound connections and registers the ones that pass.
pub struct Admission {
    verifier: Arc<dyn TokenVerifier>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    outbox_capacity: usize,
}

impl Admission {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        dispatcher: Arc<Dispatcher>,
        outbox_capacity: usize,
    ) -> Self {
        Self {
            verifier,
            registry: dispatcher.registry().clone(),
            dispatcher,
            outbox_capacity,
        }
    }

    pub fn admit(&self, token: Option<&str>, kind: ConnectionKind) -> Result<Admitted, Error> {
        self.admit_with_interest(token, kind, Vec::new())
    }

    /// Verifies `token`, registers a new connection of `kind` whose interest
    /// set starts as `hives`, and queues the connection acknowledgement.
    ///
    /// The acknowledgement is queued before the connection becomes visible to
    /// the dispatcher, so it is always the first frame the client sees.
    pub fn admit_with_interest(
        &self,
        token: Option<&str>,
        kind: ConnectionKind,
        hives: Vec<String>,
    ) -> Result<Admitted, Error> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                warn!("Refused {kind:?} connection: no credential presented");
                Error::new(ErrorKind::Auth(AuthErrorKind::Missing))
            })?;

        let identity = self.verifier.verify(token).map_err(|e| {
            warn!("Refused {kind:?} connection: {e}");
            Error::from(e)
        })?;

        let (connection, outbox) = Connection::new(identity, kind, self.outbox_capacity);
        for hive_id in hives.iter().filter(|h| !h.is_empty()) {
            connection.add_hive(hive_id);
        }

        let ack = DomainEvent::connection_ack(connection.identity());
        self.dispatcher
            .deliver(&connection, &ack)
            .map_err(|reason| Error::new(ErrorKind::Push(reason)))?;

        self.registry.register(connection.clone())?;

        info!(
            "Admitted {:?} connection {} for user {} ({} open)",
            kind,
            connection.id(),
            connection.identity().username,
            self.registry.len()
        );

        let guard = RegistrationGuard::new(self.registry.clone(), connection.id().clone());
        Ok(Admitted {
            connection,
            outbox,
            guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::error::TokenErrorKind;
    use events::{EventKind, Identity, Payload, Scope};
    use serde_json::Value;

    /// Accepts tokens of the form `ok:<user id>`.
    struct StaticVerifier;

    impl TokenVerifier for StaticVerifier {
        fn verify(&self, token: &str) -> Result<Identity, domain::Error> {
            match token.strip_prefix("ok:") {
                Some(id) => Ok(Identity {
                    id: id.to_string(),
                    username: format!("{id}-name"),
                    role: "user".to_string(),
                }),
                None => Err(domain::Error::token(TokenErrorKind::Invalid)),
            }
        }
    }

    fn admission() -> (Admission, Arc<Registry>, Arc<Dispatcher>) {
        let registry = Arc::new(Registry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let admission = Admission::new(Arc::new(StaticVerifier), dispatcher.clone(), 8);
        (admission, registry, dispatcher)
    }

    fn frame(item: Outbound) -> Value {
        match item {
            Outbound::Frame(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Probe => panic!("expected frame"),
        }
    }

    #[test]
    fn missing_token_is_refused_before_registration() {
        let (admission, registry, _) = admission();

        let err = admission.admit(None, ConnectionKind::Bidirectional).err().unwrap();
        assert_eq!(err.auth(), Some(&AuthErrorKind::Missing));

        let err = admission.admit(Some(""), ConnectionKind::Unidirectional).err().unwrap();
        assert_eq!(err.auth(), Some(&AuthErrorKind::Missing));

        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_token_is_refused_before_registration() {
        let (admission, registry, _) = admission();

        let err = admission
            .admit(Some("forged"), ConnectionKind::Bidirectional)
            .err()
            .unwrap();

        assert_eq!(err.auth(), Some(&AuthErrorKind::Invalid));
        assert!(registry.is_empty());
    }

    #[test]
    fn admitted_connection_gets_ack_first_and_only_to_itself() {
        let (admission, registry, _) = admission();
        let mut other = admission.admit(Some("ok:u0"), ConnectionKind::Bidirectional).ok().unwrap();
        other.outbox.try_recv().unwrap();

        let mut admitted = admission.admit(Some("ok:u1"), ConnectionKind::Bidirectional).ok().unwrap();

        assert!(registry.contains(admitted.connection.id()));
        let ack = frame(admitted.outbox.try_recv().unwrap());
        assert_eq!(ack["type"], "system_status");
        assert_eq!(ack["payload"]["user"]["id"], "u1");
        assert!(other.outbox.try_recv().is_err());
    }

    #[test]
    fn dropping_guard_deregisters() {
        let (admission, registry, _) = admission();
        let admitted = admission.admit(Some("ok:u1"), ConnectionKind::Unidirectional).ok().unwrap();
        let connection = admitted.connection.clone();

        drop(admitted);

        assert!(!registry.contains(connection.id()));
        assert!(connection.is_released());
    }

    #[test]
    fn initial_interest_narrows_hive_events() {
        let (admission, _registry, dispatcher) = admission();
        let mut narrowed = admission
            .admit_with_interest(
                Some("ok:u1"),
                ConnectionKind::Unidirectional,
                vec!["hive-1".to_string()],
            )
            .ok()
            .unwrap();
        narrowed.outbox.try_recv().unwrap();

        let report = dispatcher.dispatch(&DomainEvent::new(
            EventKind::SensorData,
            Scope::Hive("hive-2".to_string()),
            Payload::new(),
            Utc::now(),
        ));

        assert_eq!(report.attempted, 0);
        assert!(narrowed.outbox.try_recv().is_err());
    }
}
