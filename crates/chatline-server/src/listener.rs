//! Listening socket and per-client stream.

use std::{
    io::{self, Read, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    os::fd::{AsRawFd, RawFd},
};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::warn;

use crate::{driver::ServerConfig, error::ServerError};

/// Pending-accept queue length for the dual-stack socket.
const LISTEN_BACKLOG: i32 = 128;

/// Bind the non-blocking listening socket described by `config`.
///
/// With no explicit bind address the wildcard IPv6 address is tried first
/// with `IPV6_V6ONLY` cleared, so IPv4 clients arrive as mapped addresses
/// whatever the host default is. If any step of that fails the wildcard IPv4
/// address is used instead.
pub fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let listener = match config.bind {
        Some(ip) => bind_addr(SocketAddr::new(ip, config.port))?,
        None => match bind_dual_stack(config.port) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "dual-stack IPv6 unavailable, listening on IPv4 only");
                bind_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port))?
            },
        },
    };

    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn bind_addr(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })
}

fn bind_dual_stack(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Accepted client socket.
///
/// Reads never block, so the reactor can drain a connection until it would
/// block. Writes block until the whole buffer is handed to the kernel: when a
/// non-blocking write would block, the socket is switched to blocking mode
/// for that one write.
#[derive(Debug)]
pub struct ClientStream {
    inner: TcpStream,
}

impl ClientStream {
    /// Wrap an accepted stream and put it into non-blocking mode.
    pub fn new(inner: TcpStream) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        inner.set_nodelay(true)?;
        Ok(Self { inner })
    }

    /// Peer address of the socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.inner.set_nonblocking(false)?;
                let result = self.inner.write(buf);
                self.inner.set_nonblocking(true)?;
                result
            },
            other => other,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsRawFd for ClientStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn loopback() -> ServerConfig {
        ServerConfig { port: 0, bind: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), ..ServerConfig::default() }
    }

    #[test]
    fn bind_uses_configured_address() {
        let listener = bind(&loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn wildcard_listener_accepts_ipv4_clients() {
        let config = ServerConfig { port: 0, bind: None, ..ServerConfig::default() };
        let listener = bind(&config).unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        listener.set_nonblocking(false).unwrap();
        let (_accepted, peer) = listener.accept().unwrap();

        assert_eq!(peer.ip().to_canonical(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(peer.port(), client.local_addr().unwrap().port());
    }

    #[test]
    fn listener_is_non_blocking() {
        let listener = bind(&loopback()).unwrap();

        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn bind_conflict_reports_address() {
        let first = bind(&loopback()).unwrap();
        let port = first.local_addr().unwrap().port();
        let config = ServerConfig { port, ..loopback() };

        match bind(&config) {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr.port(), port),
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[test]
    fn client_stream_reads_without_blocking() {
        let listener = bind(&loopback()).unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        listener.set_nonblocking(false).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let mut stream = ClientStream::new(accepted).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);

        stream.write_all(b"hello\n").unwrap();
        let mut received = [0u8; 6];
        client.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"hello\n");
        assert_eq!(stream.peer_addr().unwrap(), client.local_addr().unwrap());
    }
}
