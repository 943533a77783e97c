//! Client
//!
//! Blocking client for the chatline protocol. Connects over TCP, logs in
//! with a display name and sends `chat` commands; received server lines are
//! returned one at a time or streamed from a background thread.
//!
//! # Components
//!
//! - [`ChatClient`]: connected client owning both directions
//! - [`ChatSender`]: write half after [`ChatClient::into_receiver`]
//! - [`ClientError`]: everything that can go wrong

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;

pub use chatline_proto::RelayedMessage;
pub use client::{ChatClient, ChatSender};
pub use error::ClientError;
