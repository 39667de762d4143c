use crate::error::{Error, ErrorKind, PushErrorKind};
use dashmap::{DashMap, DashSet};
use events::{Identity, Scope};
use log::*;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

pub type UserId = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport family of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// WebSocket-like; answers liveness probes
    Bidirectional,
    /// SSE-like; push only, relies on the transport's own disconnect signal
    Unidirectional,
}

/// Work queued for a connection's transport task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A serialized event frame
    Frame(String),
    /// A liveness probe (a ping control frame on bidirectional transports)
    Probe,
}

/// A live, authenticated delivery channel.
///
/// The registry owns connections from registration until removal. The
/// transport task holds the receiving half of `outbox` and watches
/// `released` to know when to close the underlying socket or stream.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    kind: ConnectionKind,
    outbox: mpsc::Sender<Outbound>,
    alive: AtomicBool,
    // Empty means "every hive"
    hives: DashSet<String>,
    released: CancellationToken,
}

impl Connection {
    pub fn new(
        identity: Identity,
        kind: ConnectionKind,
        outbox_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        Self::with_id(ConnectionId::new(), identity, kind, outbox_capacity)
    }

    pub fn with_id(
        id: ConnectionId,
        identity: Identity,
        kind: ConnectionKind,
        outbox_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(outbox_capacity.max(1));
        let connection = Arc::new(Self {
            id,
            identity,
            kind,
            outbox: tx,
            alive: AtomicBool::new(true),
            hives: DashSet::new(),
            released: CancellationToken::new(),
        });
        (connection, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Queues an item without waiting. A full outbox counts as a failure so
    /// that one slow consumer never stalls delivery to the others.
    pub fn push(&self, item: Outbound) -> Result<(), PushErrorKind> {
        if self.is_released() {
            return Err(PushErrorKind::Closed);
        }

        self.outbox.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => PushErrorKind::Overflow,
            TrySendError::Closed(_) => PushErrorKind::Closed,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Records a liveness acknowledgement (a pong).
    pub fn acknowledge(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clears the alive flag ahead of a probe and returns its previous value.
    pub(crate) fn begin_probe(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn interested_in(&self, hive_id: &str) -> bool {
        self.hives.is_empty() || self.hives.contains(hive_id)
    }

    pub fn hives(&self) -> Vec<String> {
        self.hives.iter().map(|h| h.key().clone()).collect()
    }

    pub(crate) fn add_hive(&self, hive_id: &str) -> bool {
        self.hives.insert(hive_id.to_string())
    }

    pub(crate) fn remove_hive(&self, hive_id: &str) -> bool {
        self.hives.remove(hive_id).is_some()
    }

    /// Signals the transport task to close. Idempotent.
    pub(crate) fn release(&self) {
        self.released.cancel();
    }

    pub fn is_released(&self) -> bool {
        self.released.is_cancelled()
    }

    /// Resolves once the connection has been removed from its registry.
    pub fn released(&self) -> WaitForCancellationFuture<'_> {
        self.released.cancelled()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.identity.id)
            .field("kind", &self.kind)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Process-wide set of live connections with a secondary index by user.
///
/// Lookups hand out `Arc` snapshots, so no shard lock is held while callers
/// push to connections. A connection is visible either fully constructed or
/// not at all.
pub struct Registry {
    /// Primary storage: lookup by connection_id for registration/cleanup
    connections: DashMap<ConnectionId, Arc<Connection>>,

    /// Secondary index: lookup by user_id for user-scoped routing
    user_index: DashMap<UserId, HashSet<ConnectionId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Adds a connection. Fails with `DuplicateId` if the id is already taken.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), Error> {
        let id = connection.id().clone();
        let user_id = connection.identity().id.clone();

        // Index first: a remove racing with this call can only see the
        // connection once it is in the primary map, and by then it is indexed.
        let newly_indexed = self
            .user_index
            .entry(user_id.clone())
            .or_default()
            .insert(id.clone());

        match self.connections.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                if newly_indexed {
                    self.unindex(&user_id, &id);
                }
                error!("Refusing to register duplicate connection id {id}");
                Err(Error::new(ErrorKind::DuplicateId))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(connection);
                debug!("Registered connection {id} for user {user_id}");
                Ok(())
            }
        }
    }

    /// Removes a connection and releases its transport. Removing an unknown
    /// id is a no-op; only the first of several racing callers gets `Some`.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(id)?;
        self.unindex(&connection.identity().id, id);
        connection.release();
        debug!("Removed connection {id}");
        Some(connection)
    }

    fn unindex(&self, user_id: &str, id: &ConnectionId) {
        if let Some(mut entry) = self.user_index.get_mut(user_id) {
            entry.remove(id);

            // Clean up empty user entries
            if entry.is_empty() {
                drop(entry); // Release lock before removal
                self.user_index.remove_if(user_id, |_, ids| ids.is_empty());
            }
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Connections an event with `scope` should reach.
    pub fn lookup(&self, scope: &Scope) -> Vec<Arc<Connection>> {
        match scope {
            Scope::Broadcast => self.all(),
            Scope::Hive(hive_id) => self
                .connections
                .iter()
                .filter(|entry| entry.value().interested_in(hive_id))
                .map(|entry| entry.value().clone())
                .collect(),
            Scope::User(user_id) => self.lookup_by_identity(user_id),
        }
    }

    /// Every connection opened by `user_id` (a user may have several tabs/devices).
    pub fn lookup_by_identity(&self, user_id: &str) -> Vec<Arc<Connection>> {
        let ids: Vec<ConnectionId> = match self.user_index.get(user_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };

        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Adds `hive_id` to a connection's interest set. Returns false if the
    /// connection is not registered.
    pub fn subscribe(&self, id: &ConnectionId, hive_id: &str) -> bool {
        match self.connections.get(id) {
            Some(entry) => {
                entry.value().add_hive(hive_id);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: &ConnectionId, hive_id: &str) -> bool {
        match self.connections.get(id) {
            Some(entry) => {
                entry.value().remove_hive(hive_id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn count_by_kind(&self, kind: ConnectionKind) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().kind() == kind)
            .count()
    }

    /// Removes and releases every connection. Used on shutdown.
    pub fn release_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.remove(id).is_some()).count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its connection from the registry when dropped.
///
/// Transport tasks hold one so that a client disconnect, an error, or the
/// task simply being dropped by the server all end in removal.
pub struct RegistrationGuard {
    registry: Arc<Registry>,
    id: ConnectionId,
}

impl RegistrationGuard {
    pub fn new(registry: Arc<Registry>, id: ConnectionId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.id).is_some() {
            info!("Connection {} closed", self.id);
        }
    }
}
