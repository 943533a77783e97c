//! Chatline server.
//!
//! A single-threaded, readiness-driven chat relay. Clients connect over TCP,
//! claim a display name with `user <name>`, and send `chat` commands that are
//! relayed to the named recipients with a server-side timestamp. Presence
//! changes are broadcast to every logged-in user.
//!
//! # Architecture
//!
//! The protocol logic in [`SessionDriver`] performs no waiting of its own:
//! it is told which connection to service and reads at most one line from
//! it. The [`Reactor`] owns the sockets and decides, from `mio` readiness,
//! what the driver services next. [`Server`] wires both to a bound listener.
//!
//! # Components
//!
//! - [`Registry`]: pending connections and named slots (live or stale)
//! - [`Relay`]: chat fan-out and presence broadcasts
//! - [`SessionDriver`]: per-line protocol state machine
//! - [`Reactor`]: readiness loop, accept, socket registration
//! - [`SystemEnv`]: production clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod env;
mod error;
mod listener;
mod reactor;
mod registry;
mod relay;
mod slots;

use std::net::SocketAddr;

pub use driver::{DEFAULT_WELCOME_BANNER, Disconnect, ServerConfig, Service, SessionDriver};
pub use env::{Environment, SystemEnv};
pub use error::{RegistryError, RelayError, ServerError};
pub use listener::ClientStream;
pub use reactor::{Reactor, ShutdownHandle};
pub use registry::{Claim, NamedSession, Registry, Resolution};
pub use relay::{Relay, RelayOutcome};
pub use slots::{ConnectionId, SlotTable};
use tracing::info;

/// Production chat server.
///
/// Binds the listener on construction; nothing is served until
/// [`Server::run`] is called.
pub struct Server<E = SystemEnv>
where
    E: Environment,
{
    reactor: Reactor<E>,
}

impl Server<SystemEnv> {
    /// Validate `config` and bind the listener, using the system clock.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with_env(config, SystemEnv::new())
    }
}

impl<E> Server<E>
where
    E: Environment,
{
    /// Validate `config` and bind the listener with a custom environment.
    pub fn bind_with_env(config: &ServerConfig, env: E) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = listener::bind(config)?;
        let reactor = Reactor::new(listener, config, env)?;
        info!(addr = %reactor.local_addr(), "listening");

        Ok(Self { reactor })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    /// Handle that stops a running server from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Serve clients until shutdown is requested.
    ///
    /// Returns an error only when the readiness wait itself fails; failures
    /// of individual connections are handled inside the loop.
    pub fn run(self) -> Result<(), ServerError> {
        self.reactor.run()
    }
}
