//! Blocking TCP client.
//!
//! [`ChatClient`] speaks the protocol synchronously: every call writes a whole
//! line or waits for one. For interactive use, [`ChatClient::into_receiver`]
//! moves the read side onto a background thread and hands back a
//! [`ChatSender`] for the write side, so the two never share a socket handle.

use std::{
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::mpsc,
    thread,
    time::Duration,
};

use bytes::Bytes;
use chatline_proto::{
    Chat, Command, ExactRead, LineRead, LineTransport, RECV_BUFFER_CAPACITY, RelayedMessage,
};
use tracing::debug;

use crate::error::ClientError;

/// Connected client owning both directions of the socket.
#[derive(Debug)]
pub struct ChatClient {
    transport: LineTransport<TcpStream>,
}

impl ChatClient {
    /// Connect to `addr`, trying every resolved address in turn.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let mut last_error = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect(candidate) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(addr = %candidate, "connected");
                    return Ok(Self { transport: LineTransport::new(stream) });
                },
                Err(e) => {
                    debug!(addr = %candidate, error = %e, "connect attempt failed");
                    last_error = Some(e);
                },
            }
        }

        Err(last_error.map_or(ClientError::NoAddress, ClientError::Io))
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.transport.get_ref().local_addr()?)
    }

    /// Server address of the connection.
    pub fn peer_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.transport.get_ref().peer_addr()?)
    }

    /// Bound how long reads wait. `None` waits forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        Ok(self.transport.get_ref().set_read_timeout(timeout)?)
    }

    /// Claim `name` and return the server's first reply: the welcome banner
    /// on success, a rejection notice otherwise.
    pub fn login(&mut self, name: &str) -> Result<String, ClientError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ClientError::InvalidText("name must be a single non-empty word"));
        }
        self.send_line(&format!("user {name}"))?;
        self.read_line()
    }

    /// Send `text` to `recipients`.
    pub fn chat(&mut self, recipients: &[&str], text: &str) -> Result<(), ClientError> {
        let line = chat_line(recipients, text)?;
        self.send_line(&line)
    }

    /// Send one raw command line. The newline is appended.
    pub fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        let framed = frame(line)?;
        Ok(self.transport.send_all(&framed)?)
    }

    /// Wait for the next server line, newline stripped.
    pub fn read_line(&mut self) -> Result<String, ClientError> {
        read_line(&mut self.transport)
    }

    /// Wait for the next line and decode it as a relayed message.
    pub fn read_message(&mut self) -> Result<RelayedMessage, ClientError> {
        let line = self.read_line()?;
        Ok(RelayedMessage::parse(&line)?)
    }

    /// Read exactly `len` bytes of binary payload following a line.
    pub fn read_exact(&mut self, len: usize) -> Result<Bytes, ClientError> {
        match self.transport.read_exact(len) {
            Ok(ExactRead::Complete(bytes)) => Ok(bytes),
            Ok(ExactRead::Short(_) | ExactRead::Closed) => Err(ClientError::Closed),
            Err(e) => Err(timeout_or_io(e)),
        }
    }

    /// Split into a sender and a channel of received lines.
    ///
    /// A background thread reads lines until the server closes the
    /// connection or the receiver is dropped. Bytes already buffered by this
    /// client are delivered first.
    pub fn into_receiver(self) -> Result<(ChatSender, mpsc::Receiver<String>), ClientError> {
        let writer = self.transport.get_ref().try_clone()?;
        writer.set_read_timeout(None)?;
        self.transport.get_ref().set_read_timeout(None)?;

        let (tx, rx) = mpsc::channel();
        let mut transport = self.transport;
        thread::Builder::new().name("chatline-receiver".into()).spawn(move || {
            loop {
                match read_line(&mut transport) {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        debug!(error = %e, "receiver stopped");
                        break;
                    },
                }
            }
        })?;

        Ok((ChatSender { stream: writer }, rx))
    }
}

/// Write half of a client split by [`ChatClient::into_receiver`].
#[derive(Debug)]
pub struct ChatSender {
    stream: TcpStream,
}

impl ChatSender {
    /// Send `text` to `recipients`.
    pub fn chat(&mut self, recipients: &[&str], text: &str) -> Result<(), ClientError> {
        let line = chat_line(recipients, text)?;
        self.send_line(&line)
    }

    /// Send one raw command line. The newline is appended.
    pub fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        let framed = frame(line)?;
        self.stream.write_all(&framed)?;
        Ok(self.stream.flush()?)
    }

    /// Close both directions. The receiver thread sees end of stream.
    pub fn close(self) -> Result<(), ClientError> {
        Ok(self.stream.shutdown(Shutdown::Both)?)
    }
}

fn chat_line(recipients: &[&str], text: &str) -> Result<String, ClientError> {
    if text.contains('"') {
        return Err(ClientError::InvalidText("message text cannot contain '\"'"));
    }
    if recipients.iter().any(|name| name.is_empty() || name.contains(char::is_whitespace)) {
        return Err(ClientError::InvalidText("recipient must be a single non-empty word"));
    }

    let chat = Chat {
        recipients: recipients.iter().map(ToString::to_string).collect(),
        text: text.to_string(),
    };
    Ok(Command::Chat(chat).to_string())
}

fn frame(line: &str) -> Result<Vec<u8>, ClientError> {
    if line.contains(['\n', '\r']) {
        return Err(ClientError::InvalidText("line cannot contain a line break"));
    }
    let mut framed = Vec::with_capacity(line.len() + 1);
    framed.extend_from_slice(line.as_bytes());
    framed.push(b'\n');
    Ok(framed)
}

fn read_line(transport: &mut LineTransport<TcpStream>) -> Result<String, ClientError> {
    match transport.read_line(RECV_BUFFER_CAPACITY) {
        Ok(LineRead::Complete(line)) => Ok(String::from_utf8_lossy(&line).into_owned()),
        Ok(LineRead::Overflow(_)) => Err(ClientError::LineTooLong(RECV_BUFFER_CAPACITY)),
        Ok(LineRead::Truncated(_) | LineRead::Closed) => Err(ClientError::Closed),
        Ok(LineRead::Incomplete) => Err(ClientError::Timeout),
        Err(e) => Err(timeout_or_io(e)),
    }
}

fn timeout_or_io(e: io::Error) -> ClientError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
        _ => ClientError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_line_matches_wire_form() {
        assert_eq!(chat_line(&["bob", "carol"], "hi all").unwrap(), "chat bob carol \"hi all\"");
    }

    #[test]
    fn chat_line_rejects_unframeable_input() {
        assert!(matches!(chat_line(&["bob"], "say \"x\""), Err(ClientError::InvalidText(_))));
        assert!(matches!(chat_line(&["bob smith"], "hi"), Err(ClientError::InvalidText(_))));
        assert!(matches!(chat_line(&[""], "hi"), Err(ClientError::InvalidText(_))));
    }

    #[test]
    fn frame_appends_single_newline() {
        assert_eq!(frame("user alice").unwrap(), b"user alice\n");
        assert!(frame("user alice\nuser bob").is_err());
    }

    #[test]
    fn timeouts_are_classified() {
        assert!(matches!(timeout_or_io(io::ErrorKind::WouldBlock.into()), ClientError::Timeout));
        assert!(matches!(
            timeout_or_io(io::ErrorKind::ConnectionReset.into()),
            ClientError::Io(_)
        ));
    }
}
