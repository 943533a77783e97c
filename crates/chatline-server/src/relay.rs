//! Message relay and presence broadcasts.
//!
//! Relay is all-or-nothing on name resolution: every recipient is looked up
//! before a single byte is written, so an unknown name aborts the whole chat
//! and nobody receives a partial fan-out. Once resolution succeeds, delivery
//! is best-effort per recipient. The message line is encoded once and written
//! to each live recipient in the order the sender listed them.

use std::{
    io::{Read, Write},
    net::IpAddr,
};

use chatline_proto::{Chat, Event, OfflineNotice};
use tracing::{debug, info};

use crate::{
    error::RelayError,
    registry::{Registry, Resolution},
    slots::ConnectionId,
};

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Every recipient resolved. Counts refer to recipient entries, so a name
    /// listed twice counts twice.
    Delivered {
        /// Recipients that received the message
        delivered: usize,
        /// Recipients that were off-line or unreachable
        offline: usize,
    },
    /// A recipient name has never been registered. Nothing was delivered.
    UnknownRecipient(String),
}

/// Relays chats and presence changes between sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Relay {
    notice: OfflineNotice,
}

impl Relay {
    /// Create a relay that reports off-line recipients with `notice`.
    pub fn new(notice: OfflineNotice) -> Self {
        Self { notice }
    }

    /// Wording used for off-line recipients.
    pub fn notice(&self) -> OfflineNotice {
        self.notice
    }

    /// Relay `chat` from the live session on `sender`, stamped `timestamp`.
    ///
    /// A live recipient whose write fails is only reported to the sender. Its
    /// own connection is left alone; the failure resurfaces when the reactor
    /// next reads from it.
    ///
    /// # Errors
    ///
    /// - `RelayError::SenderNotLive` if `sender` has no live session
    /// - `RelayError::SenderUnreachable` if a notice to the sender could not
    ///   be written; the caller must treat the sender as departed
    pub fn chat<S: Read + Write>(
        &self,
        registry: &mut Registry<S>,
        sender: ConnectionId,
        chat: &Chat,
        timestamp: u64,
    ) -> Result<RelayOutcome, RelayError> {
        let sender_name =
            registry.name_of(sender).ok_or(RelayError::SenderNotLive(sender))?.to_string();

        let mut targets = Vec::with_capacity(chat.recipients.len());
        for name in &chat.recipients {
            match registry.resolve(name) {
                Some(resolution) => targets.push((name.as_str(), resolution)),
                None => {
                    debug!(sender = %sender_name, recipient = %name, "unknown recipient");
                    let notice = Event::NoSuchUser { name: name.as_str() }.encode();
                    notify_sender(registry, sender, &sender_name, &notice)?;
                    return Ok(RelayOutcome::UnknownRecipient(name.clone()));
                },
            }
        }

        let line = Event::Message { timestamp, sender: &sender_name, text: &chat.text }.encode();
        let mut delivered = 0;
        let mut offline = 0;

        for (name, resolution) in targets {
            let reached = match resolution {
                Resolution::Live(id) => match registry.send(id, &line) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(recipient = %name, error = %e, "delivery failed");
                        false
                    },
                },
                Resolution::Stale => false,
            };

            if reached {
                delivered += 1;
            } else {
                offline += 1;
                let notice = Event::RecipientOffline { name, notice: self.notice }.encode();
                notify_sender(registry, sender, &sender_name, &notice)?;
            }
        }

        debug!(sender = %sender_name, delivered, offline, "chat relayed");
        Ok(RelayOutcome::Delivered { delivered, offline })
    }

    /// Tell every live session, the new one included, that `name` came
    /// on-line from `ip`. Returns how many sessions were reached.
    pub fn announce_online<S: Read + Write>(
        &self,
        registry: &mut Registry<S>,
        name: &str,
        ip: IpAddr,
    ) -> usize {
        info!(user = %name, ip = %ip.to_canonical(), "user on-line");
        broadcast(registry, &Event::Online { name, ip }.encode(), None)
    }

    /// Tell every live session except `leaving` that `name` went off-line.
    /// Returns how many sessions were reached.
    pub fn announce_offline<S: Read + Write>(
        &self,
        registry: &mut Registry<S>,
        name: &str,
        leaving: ConnectionId,
    ) -> usize {
        info!(user = %name, "user off-line");
        broadcast(registry, &Event::Offline { name }.encode(), Some(leaving))
    }
}

fn notify_sender<S: Read + Write>(
    registry: &mut Registry<S>,
    sender: ConnectionId,
    sender_name: &str,
    line: &[u8],
) -> Result<(), RelayError> {
    registry
        .send(sender, line)
        .map_err(|source| RelayError::SenderUnreachable { name: sender_name.to_string(), source })
}

/// Write `line` to every live session but `except`. Failures are logged and
/// skipped.
fn broadcast<S: Read + Write>(
    registry: &mut Registry<S>,
    line: &[u8],
    except: Option<ConnectionId>,
) -> usize {
    let mut reached = 0;
    for id in registry.live_ids() {
        if Some(id) == except {
            continue;
        }
        match registry.send(id, line) {
            Ok(()) => reached += 1,
            Err(e) => debug!(connection = %id, error = %e, "broadcast write failed"),
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    };

    use super::*;

    /// Stream that records writes and can be told to fail them.
    #[derive(Debug, Default)]
    struct Sink {
        written: Vec<u8>,
        broken: bool,
    }

    impl Sink {
        fn broken() -> Self {
            Self { written: Vec::new(), broken: true }
        }
    }

    impl Read for Sink {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port))
    }

    fn login(registry: &mut Registry<Sink>, name: &str, sink: Sink) -> ConnectionId {
        let id = registry.accept(sink, addr(4000));
        registry.claim(id, name).unwrap();
        id
    }

    /// Drain everything written to `id` so far by closing it.
    fn written(registry: &mut Registry<Sink>, id: ConnectionId) -> String {
        if registry.mark_stale(id).is_none() {
            registry.discard(id);
        }
        let (_, sink) = registry
            .take_closed()
            .into_iter()
            .find(|(closed, _)| *closed == id)
            .expect("connection was open");
        String::from_utf8(sink.written).unwrap()
    }

    fn chat(recipients: &[&str], text: &str) -> Chat {
        Chat { recipients: recipients.iter().map(ToString::to_string).collect(), text: text.into() }
    }

    #[test]
    fn relays_to_every_listed_recipient_in_order() {
        let mut registry = Registry::new();
        let alice = login(&mut registry, "alice", Sink::default());
        let bob = login(&mut registry, "bob", Sink::default());
        let carol = login(&mut registry, "carol", Sink::default());

        let outcome =
            Relay::default().chat(&mut registry, alice, &chat(&["carol", "bob"], "hi"), 7).unwrap();

        assert_eq!(outcome, RelayOutcome::Delivered { delivered: 2, offline: 0 });
        assert_eq!(written(&mut registry, bob), "message 7 alice \"hi\"\n");
        assert_eq!(written(&mut registry, carol), "message 7 alice \"hi\"\n");
        assert_eq!(written(&mut registry, alice), "");
    }

    #[test]
    fn unknown_recipient_aborts_before_any_delivery() {
        let mut registry = Registry::new();
        let alice = login(&mut registry, "alice", Sink::default());
        let bob = login(&mut registry, "bob", Sink::default());

        let outcome = Relay::default()
            .chat(&mut registry, alice, &chat(&["bob", "zed", "ghost"], "hi"), 1)
            .unwrap();

        assert_eq!(outcome, RelayOutcome::UnknownRecipient("zed".into()));
        assert_eq!(written(&mut registry, bob), "");
        assert_eq!(written(&mut registry, alice), "User zed does not exist.\n");
    }

    #[test]
    fn stale_recipient_earns_offline_notice() {
        let mut registry = Registry::new();
        let alice = login(&mut registry, "alice", Sink::default());
        let bob = login(&mut registry, "bob", Sink::default());
        registry.mark_stale(bob);

        let relay = Relay::new(OfflineNotice::Undelivered);
        let outcome = relay.chat(&mut registry, alice, &chat(&["bob"], "hi"), 1).unwrap();

        assert_eq!(outcome, RelayOutcome::Delivered { delivered: 0, offline: 1 });
        assert_eq!(
            written(&mut registry, alice),
            "User bob is off-line. The message was not delivered.\n"
        );
    }

    #[test]
    fn failed_delivery_does_not_mark_recipient_stale() {
        let mut registry = Registry::new();
        let alice = login(&mut registry, "alice", Sink::default());
        let bob = login(&mut registry, "bob", Sink::broken());

        let outcome = Relay::default().chat(&mut registry, alice, &chat(&["bob"], "hi"), 1).unwrap();

        assert_eq!(outcome, RelayOutcome::Delivered { delivered: 0, offline: 1 });
        assert!(registry.is_live(bob));
        assert_eq!(
            written(&mut registry, alice),
            "User bob is off-line. The message will be passed when he comes back.\n"
        );
    }

    #[test]
    fn unreachable_sender_is_an_error() {
        let mut registry = Registry::new();
        let alice = login(&mut registry, "alice", Sink::broken());

        let err =
            Relay::default().chat(&mut registry, alice, &chat(&["nobody"], "hi"), 1).unwrap_err();

        assert!(matches!(err, RelayError::SenderUnreachable { ref name, .. } if name == "alice"));
    }

    #[test]
    fn sender_may_address_itself() {
        let mut registry = Registry::new();
        let alice = login(&mut registry, "alice", Sink::default());

        Relay::default().chat(&mut registry, alice, &chat(&["alice"], "me"), 3).unwrap();

        assert_eq!(written(&mut registry, alice), "message 3 alice \"me\"\n");
    }

    #[test]
    fn pending_sender_is_rejected() {
        let mut registry = Registry::new();
        let pending = registry.accept(Sink::default(), addr(1));

        let err = Relay::default().chat(&mut registry, pending, &chat(&[], "x"), 1).unwrap_err();
        assert!(matches!(err, RelayError::SenderNotLive(id) if id == pending));
    }

    #[test]
    fn presence_broadcasts_reach_the_right_sessions() {
        let mut registry = Registry::new();
        let alice = login(&mut registry, "alice", Sink::default());
        let bob = login(&mut registry, "bob", Sink::default());
        let pending = registry.accept(Sink::default(), addr(5));
        let relay = Relay::default();

        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(relay.announce_online(&mut registry, "bob", ip), 2);
        assert_eq!(relay.announce_offline(&mut registry, "alice", alice), 1);

        assert_eq!(
            written(&mut registry, bob),
            "User bob is on-line, IP address: 10.0.0.9\nUser alice is off-line.\n"
        );
        assert_eq!(written(&mut registry, alice), "User bob is on-line, IP address: 10.0.0.9\n");
        assert_eq!(written(&mut registry, pending), "");
    }
}
