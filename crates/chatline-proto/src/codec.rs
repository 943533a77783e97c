//! Command parsing and event encoding.
//!
//! Client commands are whitespace-tokenized text lines:
//!
//! ```text
//! user <name>
//! chat <name> [<name> ...] "<free text>"
//! ```
//!
//! Server events are fixed-format text lines, always newline-terminated when
//! encoded. See [`Event`] for the exact wording of each.

use std::{fmt, net::IpAddr};

use bytes::Bytes;

use crate::error::ProtocolError;

/// Byte offset into a raw `chat` line where the search for the opening quote
/// starts.
const QUOTE_SEARCH_OFFSET: usize = 6;

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `user <name>`: claim a display name.
    User {
        /// Requested display name
        name: String,
    },
    /// `chat <name>... "<text>"`: relay text to the named users.
    Chat(Chat),
    /// Any other command word.
    Other {
        /// The unrecognized command word
        verb: String,
    },
    /// Empty or whitespace-only line.
    Blank,
}

/// Arguments of a `chat` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    /// Recipient names in the order they were listed
    pub recipients: Vec<String>,
    /// Text between the quotes
    pub text: String,
}

impl Command {
    /// Parse one line (delimiter already stripped).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Garbled` if the line is not UTF-8
    /// - `ProtocolError::MissingArgument` for `user` without a name
    /// - `ProtocolError::UnquotedMessage` for `chat` without two quotes
    pub fn parse(line: &[u8]) -> Result<Self, ProtocolError> {
        let line = std::str::from_utf8(line).map_err(|_| ProtocolError::Garbled)?;
        let line = line.strip_suffix('\r').unwrap_or(line);

        let mut tokens = line.split_whitespace();
        let Some(verb) = tokens.next() else {
            return Ok(Self::Blank);
        };

        match verb {
            "user" => {
                let name =
                    tokens.next().ok_or(ProtocolError::MissingArgument { command: "user" })?;
                Ok(Self::User { name: name.to_string() })
            },
            "chat" => Chat::parse(line).map(Self::Chat),
            other => Ok(Self::Other { verb: other.to_string() }),
        }
    }
}

impl Chat {
    /// Extract recipients and quoted text from a raw `chat` line.
    fn parse(line: &str) -> Result<Self, ProtocolError> {
        let bytes = line.as_bytes();
        let start = QUOTE_SEARCH_OFFSET.min(bytes.len());
        let mut quotes = bytes[start..]
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == b'"')
            .map(|(i, _)| start + i);

        let (Some(open), Some(close)) = (quotes.next(), quotes.next()) else {
            return Err(ProtocolError::UnquotedMessage);
        };

        let recipients = line[..open]
            .split_whitespace()
            .skip(1)
            .take_while(|token| !token.starts_with('"'))
            .map(str::to_string)
            .collect();

        Ok(Self { recipients, text: line[open + 1..close].to_string() })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { name } => write!(f, "user {name}"),
            Self::Chat(Chat { recipients, text }) => {
                write!(f, "chat {} \"{text}\"", recipients.join(" "))
            },
            Self::Other { verb } => f.write_str(verb),
            Self::Blank => Ok(()),
        }
    }
}

/// Wording of the notice a sender gets for an off-line recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfflineNotice {
    /// Historical wording that promises later delivery. Nothing is stored.
    #[default]
    Deferred,
    /// States plainly that the message was dropped.
    Undelivered,
}

/// A server-to-client event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    /// Banner sent to a client right after it is named.
    Welcome {
        /// Banner text
        banner: &'a str,
    },
    /// `User <name> is on-line, IP address: <ip>`
    Online {
        /// User that logged in
        name: &'a str,
        /// Peer address (IPv4-mapped addresses print as IPv4)
        ip: IpAddr,
    },
    /// `User <name> is off-line.`
    Offline {
        /// User that left
        name: &'a str,
    },
    /// `User <name> does not exist.`
    NoSuchUser {
        /// Unresolved recipient
        name: &'a str,
    },
    /// `User <name> has logged in.`, sent to a rejected duplicate login.
    NameTaken {
        /// Contested name
        name: &'a str,
    },
    /// `message <epoch-seconds> <sender> "<text>"`
    Message {
        /// Seconds since the Unix epoch
        timestamp: u64,
        /// Sending user
        sender: &'a str,
        /// Relayed text
        text: &'a str,
    },
    /// Courtesy notice for a recipient that could not be reached.
    RecipientOffline {
        /// Unreachable recipient
        name: &'a str,
        /// Which wording to use
        notice: OfflineNotice,
    },
}

impl Event<'_> {
    /// Encode as a newline-terminated wire line.
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{self}\n"))
    }
}

impl fmt::Display for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome { banner } => f.write_str(banner),
            Self::Online { name, ip } => {
                write!(f, "User {name} is on-line, IP address: {}", ip.to_canonical())
            },
            Self::Offline { name } => write!(f, "User {name} is off-line."),
            Self::NoSuchUser { name } => write!(f, "User {name} does not exist."),
            Self::NameTaken { name } => write!(f, "User {name} has logged in."),
            Self::Message { timestamp, sender, text } => {
                write!(f, "message {timestamp} {sender} \"{text}\"")
            },
            Self::RecipientOffline { name, notice: OfflineNotice::Deferred } => write!(
                f,
                "User {name} is off-line. The message will be passed when he comes back."
            ),
            Self::RecipientOffline { name, notice: OfflineNotice::Undelivered } => {
                write!(f, "User {name} is off-line. The message was not delivered.")
            },
        }
    }
}

/// A relayed chat message as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMessage {
    /// Seconds since the Unix epoch, stamped by the server
    pub timestamp: u64,
    /// Sending user
    pub sender: String,
    /// Message text
    pub text: String,
}

impl RelayedMessage {
    /// Parse a `message <epoch-seconds> <sender> "<text>"` line.
    ///
    /// # Errors
    ///
    /// `ProtocolError::MalformedEvent` if the line does not have that shape.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedEvent(line.to_string());
        let trimmed = line.trim_end_matches(['\r', '\n']);

        let rest = trimmed.strip_prefix("message ").ok_or_else(malformed)?;
        let (timestamp, rest) = rest.split_once(' ').ok_or_else(malformed)?;
        let (sender, quoted) = rest.split_once(' ').ok_or_else(malformed)?;
        let text = quoted
            .strip_prefix('"')
            .and_then(|q| q.strip_suffix('"'))
            .ok_or_else(malformed)?;

        Ok(Self {
            timestamp: timestamp.parse().map_err(|_| malformed())?,
            sender: sender.to_string(),
            text: text.to_string(),
        })
    }
}
