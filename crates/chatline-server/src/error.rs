//! Server error types.
//!
//! Only [`ServerError`] ever leaves the reactor. Registry and relay errors are
//! per-connection: the session driver absorbs them (presence broadcast, slot
//! cleanup) within the cycle that raised them.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::slots::ConnectionId;

/// Errors that stop the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, unusable limits).
    ///
    /// Fatal at startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// The listening socket could not be set up.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted last
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Transport error while registering or configuring sockets.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The readiness wait itself failed.
    ///
    /// Fatal for the whole process: without it no connection can be served.
    #[error("readiness wait failed: {0}")]
    Poll(#[source] io::Error),
}

/// Errors from registry state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The handle does not refer to a pending connection.
    ///
    /// Either the connection was closed earlier in the cycle or it already
    /// has a name. Logic bug if it happens on a fresh handle.
    #[error("connection {0} is not pending")]
    NotPending(ConnectionId),
}

/// Errors that abort a relay early.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The sender is not a live named session.
    #[error("connection {0} is not a live session")]
    SenderNotLive(ConnectionId),

    /// Writing a notice back to the sender failed.
    ///
    /// Fatal for the sender's connection; other recipients are unaffected.
    #[error("failed to reach sender {name}: {source}")]
    SenderUnreachable {
        /// Sender's display name
        name: String,
        /// Underlying write error
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotTable;

    #[test]
    fn server_error_display() {
        let err = ServerError::Config("max line length must be at least 2".to_string());
        assert_eq!(err.to_string(), "configuration error: max line length must be at least 2");

        let err = ServerError::Poll(io::Error::other("epoll"));
        assert_eq!(err.to_string(), "readiness wait failed: epoll");
    }

    #[test]
    fn relay_error_display() {
        let mut table = SlotTable::new();
        let id = table.insert(());

        let err = RelayError::SenderNotLive(id);
        assert_eq!(err.to_string(), "connection 0v0 is not a live session");

        let err = RelayError::SenderUnreachable {
            name: "alice".to_string(),
            source: io::ErrorKind::BrokenPipe.into(),
        };
        assert!(err.to_string().starts_with("failed to reach sender alice: "));
    }
}
