//! Single-threaded readiness loop.
//!
//! The reactor owns the listening socket, a `mio` poll instance and the
//! session driver. Each wake-up runs one cycle:
//!
//! 1. accept at most one connection
//! 2. service every ready live session, one line each
//! 3. service every ready pending connection, one line each
//! 4. deregister and drop closed sockets, then register new ones
//!
//! `mio` reports readiness edge-triggered, so the reactor remembers which
//! sockets are still ready. A connection stays ready until a read would
//! block; the listener stays ready until accept would block. While anything
//! is still ready the next wait does not sleep, so a socket with lines left
//! in its buffer is serviced again in the next cycle rather than starved.

use std::{
    collections::{HashMap, HashSet},
    io,
    net::{SocketAddr, TcpListener},
    os::fd::{AsRawFd, RawFd},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, Waker, unix::SourceFd};
use tracing::{debug, error, info, warn};

use crate::{
    driver::{ServerConfig, Service, SessionDriver},
    env::Environment,
    error::ServerError,
    listener::ClientStream,
    slots::ConnectionId,
};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;
const EVENT_CAPACITY: usize = 256;

/// Requests a running server to stop.
///
/// Cloneable and `Send`; may be triggered from any thread. The reactor stops
/// at its next wake-up and closes every socket without notifying clients.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the server to stop and wake it if it is waiting.
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake()
    }

    /// True once a shutdown was requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Readiness loop driving one [`SessionDriver`].
pub struct Reactor<E>
where
    E: Environment,
{
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    driver: SessionDriver<ClientStream, E>,
    /// Registered connections by poll token
    watched: HashMap<Token, ConnectionId>,
    /// Connections that may have input left
    readable: HashSet<ConnectionId>,
    /// Accepted this cycle, registered at the end of it
    fresh: Vec<(ConnectionId, RawFd)>,
    listener_ready: bool,
    shutdown: ShutdownHandle,
}

impl<E> Reactor<E>
where
    E: Environment,
{
    /// Take over a non-blocking listener.
    pub fn new(listener: TcpListener, config: &ServerConfig, env: E) -> Result<Self, ServerError> {
        let local_addr = listener.local_addr()?;
        let poll = Poll::new()?;

        let fd = listener.as_raw_fd();
        poll.registry().register(&mut SourceFd(&fd), LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            local_addr,
            driver: SessionDriver::new(config, env),
            watched: HashMap::new(),
            readable: HashSet::new(),
            fresh: Vec::new(),
            listener_ready: false,
            shutdown: ShutdownHandle { requested: Arc::new(AtomicBool::new(false)), waker },
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that stops [`Reactor::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested or the readiness wait fails.
    pub fn run(mut self) -> Result<(), ServerError> {
        loop {
            let timeout = if self.listener_ready || !self.readable.is_empty() {
                Some(Duration::ZERO)
            } else {
                None
            };

            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "readiness wait failed");
                    return Err(ServerError::Poll(e));
                },
            }

            if self.shutdown.is_requested() {
                info!(
                    connections = self.driver.registry().connection_count(),
                    "shutting down"
                );
                return Ok(());
            }

            for event in &self.events {
                match event.token() {
                    LISTENER => self.listener_ready = true,
                    WAKER => {},
                    token => {
                        if let Some(id) = self.watched.get(&token) {
                            self.readable.insert(*id);
                        }
                    },
                }
            }

            self.cycle()?;
        }
    }

    fn cycle(&mut self) -> Result<(), ServerError> {
        if self.listener_ready {
            self.accept_one();
        }

        for id in self.driver.live_ids() {
            if self.readable.contains(&id) {
                let outcome = self.driver.service_live(id);
                self.settle(id, &outcome);
            }
        }

        for id in self.driver.pending_ids() {
            if self.readable.contains(&id) {
                let outcome = self.driver.service_pending(id);
                self.settle(id, &outcome);
            }
        }

        self.sync()
    }

    fn accept_one(&mut self) {
        match self.listener.accept() {
            Ok((stream, peer)) => match ClientStream::new(stream) {
                Ok(stream) => {
                    let fd = stream.as_raw_fd();
                    let id = self.driver.accept(stream, peer);
                    self.fresh.push((id, fd));
                },
                Err(e) => warn!(%peer, error = %e, "failed to configure accepted socket"),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.listener_ready = false,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => {
                // Retried when the next connection attempt raises readiness.
                warn!(error = %e, "accept failed");
                self.listener_ready = false;
            },
        }
    }

    fn settle(&mut self, id: ConnectionId, outcome: &Service) {
        match outcome {
            Service::Handled => {},
            Service::Drained | Service::Closed(_) => {
                self.readable.remove(&id);
            },
        }
    }

    /// Deregister closed sockets before they are dropped, then register the
    /// connections accepted this cycle.
    fn sync(&mut self) -> Result<(), ServerError> {
        for (id, stream) in self.driver.take_closed() {
            let fd = stream.as_raw_fd();
            if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!(connection = %id, error = %e, "deregister failed");
            }
            self.watched.remove(&token_for(id));
            self.readable.remove(&id);
            drop(stream);
        }

        for (id, fd) in self.fresh.drain(..) {
            if self.driver.registry().peer(id).is_none() {
                continue;
            }
            let token = token_for(id);
            self.poll.registry().register(&mut SourceFd(&fd), token, Interest::READABLE)?;
            self.watched.insert(token, id);
            // Bytes may have arrived before registration.
            self.readable.insert(id);
        }

        Ok(())
    }
}

fn token_for(id: ConnectionId) -> Token {
    Token(id.index() + FIRST_CONNECTION)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Write},
        net::{IpAddr, Ipv4Addr, TcpStream},
        thread,
    };

    use super::*;
    use crate::{env::SystemEnv, listener};

    fn start() -> (SocketAddr, ShutdownHandle, thread::JoinHandle<Result<(), ServerError>>) {
        let config = ServerConfig {
            port: 0,
            bind: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..ServerConfig::default()
        };
        let listener = listener::bind(&config).unwrap();
        let reactor = Reactor::new(listener, &config, SystemEnv::new()).unwrap();
        let addr = reactor.local_addr();
        let handle = reactor.shutdown_handle();
        (addr, handle, thread::spawn(move || reactor.run()))
    }

    #[test]
    fn connection_tokens_skip_reserved_tokens() {
        let mut table = crate::slots::SlotTable::new();
        let first = table.insert(());

        assert_eq!(token_for(first), Token(FIRST_CONNECTION));
        assert_ne!(token_for(first), LISTENER);
        assert_ne!(token_for(first), WAKER);
    }

    #[test]
    fn shutdown_stops_an_idle_reactor() {
        let (_, handle, join) = start();

        handle.shutdown().unwrap();

        assert!(handle.is_requested());
        assert!(join.join().unwrap().is_ok());
    }

    #[test]
    fn serves_login_over_tcp() {
        let (addr, handle, join) = start();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"user alice\n").unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "Welcome to chatline.\n");

        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "User alice is on-line, IP address: 127.0.0.1\n");

        handle.shutdown().unwrap();
        assert!(join.join().unwrap().is_ok());
    }
}
