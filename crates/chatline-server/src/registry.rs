//! Client registry: pending connections and named sessions.
//!
//! The registry owns every open connection and every named slot:
//!
//! - `links`: all open sockets, addressed by generation-checked
//!   [`ConnectionId`] handles
//! - `pending`: handles of accepted connections that have no name yet, in
//!   accept order
//! - `sessions`: name → slot. A slot is live while it points at an open
//!   connection and stale once that connection died. Stale slots are kept so
//!   the name can be reclaimed.
//! - `by_link`: connection → name. Derived from `sessions` and rebuilt after
//!   every mutation of it, never edited on its own.
//!
//! ```text
//!  accept ┌─────────┐  user <name>  ┌──────┐  error/close  ┌───────┐
//! ───────>│ Pending │──────────────>│ Live │──────────────>│ Stale │
//!         └─────────┘               └──────┘               └───────┘
//!              │ error/close/other      ^    user <name>       │
//!              ↓                        └──────────────────────┘
//!           (gone)
//! ```
//!
//! Closed sockets are not dropped on the spot. They are parked until the
//! reactor takes them with [`Registry::take_closed`], so it can deregister
//! the descriptor before it is closed and possibly reused.

use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Read, Write},
    net::SocketAddr,
};

use chatline_proto::{LineRead, LineTransport};
use indexmap::IndexSet;

use crate::{
    error::RegistryError,
    slots::{ConnectionId, SlotTable},
};

/// One open connection.
#[derive(Debug)]
struct Link<S> {
    transport: LineTransport<S>,
    peer: SocketAddr,
}

/// A registry slot keyed by display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSession {
    name: String,
    peer: SocketAddr,
    link: Option<ConnectionId>,
}

impl NamedSession {
    /// Display name (the slot key).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the connection that last held the name.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current connection. `None` once the slot is stale.
    pub fn link(&self) -> Option<ConnectionId> {
        self.link
    }

    /// True while the holder's connection is open.
    pub fn is_live(&self) -> bool {
        self.link.is_some()
    }
}

/// Where a name currently points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Held by an open connection.
    Live(ConnectionId),
    /// Held by a connection that has since died.
    Stale,
}

/// Result of a pending connection claiming a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// No slot existed; a new live slot was created.
    Created,
    /// A stale slot was overwritten by this connection.
    Reclaimed,
    /// A live session already holds the name. Nothing changed.
    Taken,
}

/// Registry of pending connections and named sessions.
#[derive(Debug)]
pub struct Registry<S> {
    /// Every open connection
    links: SlotTable<Link<S>>,
    /// Unnamed connections in accept order
    pending: IndexSet<ConnectionId>,
    /// Name → slot, ordered by name
    sessions: BTreeMap<String, NamedSession>,
    /// Connection → name for live slots (derived from `sessions`)
    by_link: HashMap<ConnectionId, String>,
    /// Closed sockets awaiting deregistration
    closed: Vec<(ConnectionId, S)>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Registry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            links: SlotTable::new(),
            pending: IndexSet::new(),
            sessions: BTreeMap::new(),
            by_link: HashMap::new(),
            closed: Vec::new(),
        }
    }

    /// Register a freshly accepted connection as pending.
    pub fn accept(&mut self, stream: S, peer: SocketAddr) -> ConnectionId {
        let id = self.links.insert(Link { transport: LineTransport::new(stream), peer });
        self.pending.insert(id);
        id
    }

    /// Snapshot of pending connection handles, in accept order.
    pub fn pending_ids(&self) -> Vec<ConnectionId> {
        self.pending.iter().copied().collect()
    }

    /// Snapshot of live session handles, ordered by name.
    pub fn live_ids(&self) -> Vec<ConnectionId> {
        self.sessions.values().filter_map(|session| session.link).collect()
    }

    /// Check whether `id` is a pending connection.
    pub fn is_pending(&self, id: ConnectionId) -> bool {
        self.pending.contains(&id)
    }

    /// Check whether `id` is the connection of a live session.
    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.by_link.contains_key(&id)
    }

    /// Name of the live session on `id`. O(1) via the reverse index.
    pub fn name_of(&self, id: ConnectionId) -> Option<&str> {
        self.by_link.get(&id).map(String::as_str)
    }

    /// Peer address of an open connection.
    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.links.get(id).map(|link| link.peer)
    }

    /// Slot for `name`, live or stale.
    pub fn session(&self, name: &str) -> Option<&NamedSession> {
        self.sessions.get(name)
    }

    /// Resolve a recipient name. `None` if no slot was ever created for it.
    pub fn resolve(&self, name: &str) -> Option<Resolution> {
        self.sessions.get(name).map(|session| match session.link {
            Some(id) => Resolution::Live(id),
            None => Resolution::Stale,
        })
    }

    /// Let pending connection `id` claim `name`.
    ///
    /// On [`Claim::Created`] and [`Claim::Reclaimed`] the connection leaves the
    /// pending list and becomes the live holder of the slot. On
    /// [`Claim::Taken`] nothing changes; the caller notifies and discards the
    /// connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotPending` if `id` is not a pending connection
    pub fn claim(&mut self, id: ConnectionId, name: &str) -> Result<Claim, RegistryError> {
        let peer = self
            .links
            .get(id)
            .map(|link| link.peer)
            .filter(|_| self.is_pending(id))
            .ok_or(RegistryError::NotPending(id))?;

        let claim = match self.sessions.get_mut(name) {
            Some(session) if session.is_live() => return Ok(Claim::Taken),
            Some(session) => {
                session.peer = peer;
                session.link = Some(id);
                Claim::Reclaimed
            },
            None => {
                let session = NamedSession { name: name.to_string(), peer, link: Some(id) };
                self.sessions.insert(name.to_string(), session);
                Claim::Created
            },
        };

        self.pending.shift_remove(&id);
        self.reindex();
        Ok(claim)
    }

    /// Drop a pending connection entirely. Returns false if `id` is not
    /// pending.
    pub fn discard(&mut self, id: ConnectionId) -> bool {
        if !self.pending.shift_remove(&id) {
            return false;
        }

        self.close_link(id);
        true
    }

    /// Turn the live session on `id` stale and close its connection.
    ///
    /// Returns the session name, or `None` if `id` is not live.
    pub fn mark_stale(&mut self, id: ConnectionId) -> Option<String> {
        let name = self.by_link.get(&id)?.clone();
        if let Some(session) = self.sessions.get_mut(&name) {
            session.link = None;
        }

        self.reindex();
        self.close_link(id);
        Some(name)
    }

    /// Take the sockets closed since the last call.
    pub fn take_closed(&mut self) -> Vec<(ConnectionId, S)> {
        std::mem::take(&mut self.closed)
    }

    /// Number of open connections (pending and live).
    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    /// Number of pending connections.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of live sessions.
    pub fn live_count(&self) -> usize {
        self.by_link.len()
    }

    /// Number of slots, live and stale.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn close_link(&mut self, id: ConnectionId) {
        if let Some(link) = self.links.remove(id) {
            self.closed.push((id, link.transport.into_inner()));
        }
    }

    fn reindex(&mut self) {
        self.by_link = self
            .sessions
            .iter()
            .filter_map(|(name, session)| session.link.map(|id| (id, name.clone())))
            .collect();

        debug_assert!(self.by_link.keys().all(|id| self.links.contains(*id)));
    }
}

impl<S: Read + Write> Registry<S> {
    /// Read the next line from connection `id`.
    ///
    /// Returns `None` if the handle no longer resolves.
    pub fn read_line(&mut self, id: ConnectionId, max_len: usize) -> Option<io::Result<LineRead>> {
        self.links.get_mut(id).map(|link| link.transport.read_line(max_len))
    }

    /// Write a whole line to connection `id`.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the handle no longer resolves
    /// - Any write error from the transport
    pub fn send(&mut self, id: ConnectionId, line: &[u8]) -> io::Result<()> {
        let link = self.links.get_mut(id).ok_or(io::ErrorKind::NotConnected)?;
        link.transport.send_all(line)
    }
}
