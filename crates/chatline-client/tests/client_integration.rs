//! Integration tests for the blocking client.
//!
//! A scripted TCP peer stands in for the server so the exact bytes the client
//! writes can be checked.

use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::Duration,
};

use chatline_client::{ChatClient, ClientError};

const WAIT: Duration = Duration::from_secs(5);

/// Accept one connection and hand it to `script` on a background thread.
fn scripted_peer<F>(script: F) -> (String, thread::JoinHandle<()>)
where
    F: FnOnce(BufReader<TcpStream>, TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let writer = stream.try_clone().unwrap();
        script(BufReader::new(stream), writer);
    });
    (addr, handle)
}

fn expect_line(reader: &mut BufReader<TcpStream>, expected: &str) {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, expected);
}

#[test]
fn login_returns_first_server_line() {
    let (addr, peer) = scripted_peer(|mut reader, mut writer| {
        expect_line(&mut reader, "user alice\n");
        writer.write_all(b"Welcome!\nUser alice is on-line, IP address: 127.0.0.1\n").unwrap();
    });

    let mut client = ChatClient::connect(&addr).unwrap();
    client.set_read_timeout(Some(WAIT)).unwrap();

    assert_eq!(client.login("alice").unwrap(), "Welcome!");
    assert_eq!(client.read_line().unwrap(), "User alice is on-line, IP address: 127.0.0.1");
    peer.join().unwrap();
}

#[test]
fn chat_writes_wire_command_and_reads_message() {
    let (addr, peer) = scripted_peer(|mut reader, mut writer| {
        expect_line(&mut reader, "chat bob carol \"see you at 5\"\n");
        writer.write_all(b"message 1700000000 bob \"ok\"\n").unwrap();
    });

    let mut client = ChatClient::connect(&addr).unwrap();
    client.set_read_timeout(Some(WAIT)).unwrap();
    client.chat(&["bob", "carol"], "see you at 5").unwrap();

    let message = client.read_message().unwrap();
    assert_eq!(message.timestamp, 1_700_000_000);
    assert_eq!(message.sender, "bob");
    assert_eq!(message.text, "ok");
    peer.join().unwrap();
}

#[test]
fn receiver_thread_streams_lines_until_close() {
    let (addr, peer) = scripted_peer(|mut reader, mut writer| {
        writer.write_all(b"first\n").unwrap();
        expect_line(&mut reader, "ping\n");
        writer.write_all(b"second\nthird\n").unwrap();
    });

    let mut client = ChatClient::connect(&addr).unwrap();
    client.set_read_timeout(Some(WAIT)).unwrap();
    assert_eq!(client.read_line().unwrap(), "first");

    let (mut sender, lines) = client.into_receiver().unwrap();
    sender.send_line("ping").unwrap();

    assert_eq!(lines.recv_timeout(WAIT).unwrap(), "second");
    assert_eq!(lines.recv_timeout(WAIT).unwrap(), "third");
    peer.join().unwrap();
    // Peer dropped its socket; the receiver thread ends the channel.
    assert!(lines.recv_timeout(WAIT).is_err());
}

#[test]
fn read_exact_after_line_uses_buffered_bytes() {
    let (addr, peer) = scripted_peer(|_reader, mut writer| {
        writer.write_all(b"blob 4\nabcd").unwrap();
    });

    let mut client = ChatClient::connect(&addr).unwrap();
    client.set_read_timeout(Some(WAIT)).unwrap();

    assert_eq!(client.read_line().unwrap(), "blob 4");
    assert_eq!(&client.read_exact(4).unwrap()[..], b"abcd");
    peer.join().unwrap();
    assert!(matches!(client.read_line(), Err(ClientError::Closed)));
}

#[test]
fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(matches!(ChatClient::connect(addr), Err(ClientError::Io(_))));
}

#[test]
fn login_rejects_multi_word_name() {
    let (addr, peer) = scripted_peer(|_reader, _writer| {});
    let mut client = ChatClient::connect(&addr).unwrap();

    assert!(matches!(client.login("bob smith"), Err(ClientError::InvalidText(_))));
    peer.join().unwrap();
}
