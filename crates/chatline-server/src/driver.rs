//! Session driver.
//!
//! Ties together the registry (connections and named slots), the relay and
//! the clock. The driver never waits on a socket: the reactor decides which
//! connection to service and the driver reads at most one line from it,
//! applies the protocol, and reports whether more input may be waiting.
//!
//! # Session Lifecycle
//!
//! ```text
//!           ┌─────────┐
//!  accept ─>│ Pending │─── user <name> ──┬── name free/stale ──> Live (welcome + on-line)
//!           └─────────┘                  └── name live ───────> rejected, closed
//!                │
//!                └── close, error, overflow, anything else ────> discarded
//!
//!           ┌──────┐
//!           │ Live │─── chat ... "<text>" ──> relay
//!           └──────┘
//!                │
//!                └── close, error, overflow, violation ────────> Stale (off-line)
//! ```

use std::{
    io::{self, Read, Write},
    net::{IpAddr, SocketAddr},
};

use chatline_proto::{
    Command, Event, LineRead, MAX_LINE_LEN, OfflineNotice, ProtocolError, RECV_BUFFER_CAPACITY,
};
use tracing::{debug, info, warn};

use crate::{
    env::Environment,
    error::{RelayError, ServerError},
    registry::{Claim, Registry},
    relay::{Relay, RelayOutcome},
    slots::ConnectionId,
};

/// Banner sent to a client once its name is accepted.
pub const DEFAULT_WELCOME_BANNER: &str = "Welcome to chatline.";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Address to bind. `None` listens on all interfaces, IPv6 and IPv4.
    pub bind: Option<IpAddr>,
    /// Longest accepted command line in bytes, delimiter included
    pub max_line_len: usize,
    /// Text of the welcome line
    pub welcome_banner: String,
    /// Wording of the off-line recipient notice
    pub offline_notice: OfflineNotice,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: chatline_proto::DEFAULT_PORT,
            bind: None,
            max_line_len: MAX_LINE_LEN,
            welcome_banner: DEFAULT_WELCOME_BANNER.to_string(),
            offline_notice: OfflineNotice::default(),
        }
    }
}

impl ServerConfig {
    /// Check that the configuration can be served.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the line limit is too small to hold any
    ///   command or larger than the receive buffer, or the banner contains a
    ///   line break
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_line_len < 2 {
            return Err(ServerError::Config(format!(
                "max line length {} cannot hold a command",
                self.max_line_len
            )));
        }
        if self.max_line_len > RECV_BUFFER_CAPACITY {
            return Err(ServerError::Config(format!(
                "max line length {} exceeds the {RECV_BUFFER_CAPACITY} byte receive buffer",
                self.max_line_len
            )));
        }
        if self.welcome_banner.contains(['\n', '\r']) {
            return Err(ServerError::Config("welcome banner must be a single line".to_string()));
        }
        Ok(())
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// Peer closed on a line boundary.
    ClosedByPeer,
    /// Peer closed in the middle of a line.
    Truncated,
    /// A line exceeded the length limit.
    Overflow,
    /// Malformed or unexpected input.
    InvalidCommand(String),
    /// A login was refused because the name is held by a live session.
    NameTaken,
    /// Reading or writing the socket failed.
    Io(io::ErrorKind),
}

impl Disconnect {
    fn from_read(read: &LineRead) -> Option<Self> {
        match read {
            LineRead::Closed => Some(Self::ClosedByPeer),
            LineRead::Truncated(_) => Some(Self::Truncated),
            LineRead::Overflow(_) => Some(Self::Overflow),
            LineRead::Complete(_) | LineRead::Incomplete => None,
        }
    }
}

/// Result of servicing one connection once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Service {
    /// No complete line is available yet; wait for readiness.
    Drained,
    /// One line was handled. More may already be buffered.
    Handled,
    /// The connection is gone.
    Closed(Disconnect),
}

/// Drives all sessions of one server.
pub struct SessionDriver<S, E>
where
    E: Environment,
{
    registry: Registry<S>,
    relay: Relay,
    env: E,
    max_line_len: usize,
    welcome_banner: String,
}

impl<S, E> SessionDriver<S, E>
where
    S: Read + Write,
    E: Environment,
{
    /// Create a driver with no connections.
    pub fn new(config: &ServerConfig, env: E) -> Self {
        Self {
            registry: Registry::new(),
            relay: Relay::new(config.offline_notice),
            env,
            max_line_len: config.max_line_len,
            welcome_banner: config.welcome_banner.clone(),
        }
    }

    /// Register a freshly accepted connection.
    pub fn accept(&mut self, stream: S, peer: SocketAddr) -> ConnectionId {
        let id = self.registry.accept(stream, peer);
        info!(
            connection = %id,
            ip = %peer.ip().to_canonical(),
            port = peer.port(),
            "connection accepted"
        );
        id
    }

    /// Snapshot of live session handles.
    pub fn live_ids(&self) -> Vec<ConnectionId> {
        self.registry.live_ids()
    }

    /// Snapshot of pending connection handles.
    pub fn pending_ids(&self) -> Vec<ConnectionId> {
        self.registry.pending_ids()
    }

    /// Sockets closed since the last call, ready to be deregistered.
    pub fn take_closed(&mut self) -> Vec<(ConnectionId, S)> {
        self.registry.take_closed()
    }

    /// Read-only view of the registry.
    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Service a live session: read one line and act on it.
    pub fn service_live(&mut self, id: ConnectionId) -> Service {
        let Some(name) = self.registry.name_of(id).map(str::to_string) else {
            return Service::Closed(Disconnect::ClosedByPeer);
        };

        let read = match self.registry.read_line(id, self.max_line_len) {
            Some(Ok(read)) => read,
            Some(Err(e)) => return self.depart(id, &name, Disconnect::Io(e.kind())),
            None => return Service::Closed(Disconnect::ClosedByPeer),
        };

        let line = match read {
            LineRead::Complete(line) => line,
            LineRead::Incomplete => return Service::Drained,
            other => {
                let reason = Disconnect::from_read(&other).unwrap_or(Disconnect::ClosedByPeer);
                return self.depart(id, &name, reason);
            },
        };

        match Command::parse(&line) {
            Ok(Command::Chat(chat)) => {
                let timestamp = self.env.wall_clock_secs();
                match self.relay.chat(&mut self.registry, id, &chat, timestamp) {
                    Ok(RelayOutcome::Delivered { .. } | RelayOutcome::UnknownRecipient(_)) => {
                        Service::Handled
                    },
                    Err(RelayError::SenderUnreachable { source, .. }) => {
                        self.depart(id, &name, Disconnect::Io(source.kind()))
                    },
                    Err(RelayError::SenderNotLive(_)) => {
                        Service::Closed(Disconnect::ClosedByPeer)
                    },
                }
            },
            Ok(Command::Blank) => Service::Handled,
            Ok(other) => {
                debug!(connection = %id, user = %name, command = %other, "ignored command");
                Service::Handled
            },
            Err(e) if e.is_framing() || e == ProtocolError::UnquotedMessage => {
                self.depart(id, &name, Disconnect::InvalidCommand(e.to_string()))
            },
            Err(e) => {
                debug!(connection = %id, user = %name, error = %e, "ignored malformed command");
                Service::Handled
            },
        }
    }

    /// Service a pending connection: wait for `user <name>`.
    pub fn service_pending(&mut self, id: ConnectionId) -> Service {
        if !self.registry.is_pending(id) {
            return Service::Closed(Disconnect::ClosedByPeer);
        }

        let read = match self.registry.read_line(id, self.max_line_len) {
            Some(Ok(read)) => read,
            Some(Err(e)) => return self.discard(id, Disconnect::Io(e.kind())),
            None => return Service::Closed(Disconnect::ClosedByPeer),
        };

        let line = match read {
            LineRead::Complete(line) => line,
            LineRead::Incomplete => return Service::Drained,
            other => {
                let reason = Disconnect::from_read(&other).unwrap_or(Disconnect::ClosedByPeer);
                return self.discard(id, reason);
            },
        };

        match Command::parse(&line) {
            Ok(Command::User { name }) => self.login(id, &name),
            Ok(Command::Blank) => Service::Handled,
            Ok(other) => {
                let reason = format!("expected user command, got {}", other_verb(&other));
                self.discard(id, Disconnect::InvalidCommand(reason))
            },
            Err(e) => self.discard(id, Disconnect::InvalidCommand(e.to_string())),
        }
    }

    fn login(&mut self, id: ConnectionId, name: &str) -> Service {
        let Some(peer) = self.registry.peer(id) else {
            return Service::Closed(Disconnect::ClosedByPeer);
        };

        let claim = match self.registry.claim(id, name) {
            Ok(claim) => claim,
            Err(e) => {
                warn!(connection = %id, error = %e, "login on a connection that is not pending");
                return Service::Closed(Disconnect::ClosedByPeer);
            },
        };

        if claim == Claim::Taken {
            if let Err(e) = self.registry.send(id, &Event::NameTaken { name }.encode()) {
                debug!(connection = %id, error = %e, "rejection notice not delivered");
            }
            info!(connection = %id, user = %name, "login rejected, name in use");
            return self.discard_quietly(id, Disconnect::NameTaken);
        }

        let ip = peer.ip().to_canonical();
        info!(
            connection = %id,
            user = %name,
            %ip,
            reclaimed = claim == Claim::Reclaimed,
            "user logged in"
        );

        let welcome = Event::Welcome { banner: self.welcome_banner.as_str() }.encode();
        if let Err(e) = self.registry.send(id, &welcome) {
            return self.depart(id, name, Disconnect::Io(e.kind()));
        }

        self.relay.announce_online(&mut self.registry, name, ip);
        Service::Handled
    }

    /// Broadcast the departure of a live session and turn its slot stale.
    fn depart(&mut self, id: ConnectionId, name: &str, reason: Disconnect) -> Service {
        match &reason {
            Disconnect::ClosedByPeer => {
                info!(connection = %id, user = %name, "connection closed by user");
            },
            Disconnect::InvalidCommand(detail) => {
                warn!(connection = %id, user = %name, %detail, "connection closed, invalid command");
            },
            other => warn!(connection = %id, user = %name, reason = ?other, "connection closed"),
        }

        self.relay.announce_offline(&mut self.registry, name, id);
        self.registry.mark_stale(id);
        Service::Closed(reason)
    }

    /// Drop a pending connection.
    fn discard(&mut self, id: ConnectionId, reason: Disconnect) -> Service {
        match &reason {
            Disconnect::ClosedByPeer => debug!(connection = %id, "pending connection closed"),
            other => warn!(connection = %id, reason = ?other, "pending connection discarded"),
        }
        self.discard_quietly(id, reason)
    }

    fn discard_quietly(&mut self, id: ConnectionId, reason: Disconnect) -> Service {
        self.registry.discard(id);
        Service::Closed(reason)
    }
}

fn other_verb(command: &Command) -> String {
    match command {
        Command::Chat(_) => "chat".to_string(),
        other => other.to_string(),
    }
}
