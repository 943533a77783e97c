//! Buffered line framing over a byte stream.
//!
//! [`LineTransport`] wraps any `Read + Write` stream and turns it into a
//! sequence of newline-delimited lines. A small, fixed-capacity receive buffer
//! holds bytes that arrived past the last delimiter, so commands pipelined in
//! one segment are returned one at a time and a line split across many
//! segments is reassembled.
//!
//! The transport knows nothing about the protocol. It does no locking either:
//! each connection has exactly one reader and one writer by construction (the
//! reactor on the server, a receiver thread plus the caller on the client).
//!
//! # Outcomes
//!
//! ```text
//! read_line ──┬── Complete(line)     delimiter found within max_len bytes
//!             ├── Overflow(partial)  max_len bytes consumed, no delimiter
//!             ├── Truncated(partial) peer closed in the middle of a line
//!             ├── Closed             peer closed on a line boundary
//!             ├── Incomplete         non-blocking stream would block
//!             └── Err(io)            transport failure
//! ```

use std::io::{self, Read, Write};

use bytes::{Bytes, BytesMut};

/// Default receive buffer capacity in bytes.
pub const RECV_BUFFER_CAPACITY: usize = 1024;

const DELIMITER: u8 = b'\n';

/// Result of [`LineTransport::read_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A full line, delimiter stripped.
    Complete(Bytes),
    /// `max_len` bytes were consumed without finding a delimiter.
    Overflow(Bytes),
    /// The peer closed after sending part of a line.
    Truncated(Bytes),
    /// The peer closed before any byte of a new line arrived.
    Closed,
    /// The stream is non-blocking and has no more data right now. Bytes read
    /// so far stay buffered for the next call.
    Incomplete,
}

/// Result of [`LineTransport::read_exact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExactRead {
    /// Exactly the requested number of bytes.
    Complete(Bytes),
    /// The peer closed before the requested length was reached.
    Short(Bytes),
    /// The peer closed before any byte arrived.
    Closed,
}

/// Per-connection buffered reader and writer.
#[derive(Debug)]
pub struct LineTransport<S> {
    stream: S,
    buffer: BytesMut,
    capacity: usize,
}

impl<S> LineTransport<S> {
    /// Wrap `stream` with the default receive buffer capacity.
    pub fn new(stream: S) -> Self {
        Self::with_capacity(stream, RECV_BUFFER_CAPACITY)
    }

    /// Wrap `stream` with a receive buffer of `capacity` bytes (at least one).
    pub fn with_capacity(stream: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { stream, buffer: BytesMut::with_capacity(capacity), capacity }
    }

    /// Underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutable access to the underlying stream.
    ///
    /// Reading from it directly bypasses the receive buffer.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwrap the stream, discarding any buffered bytes.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Number of received bytes not yet returned to the caller.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<S: Write> LineTransport<S> {
    /// Write all of `bytes`, looping over partial writes.
    ///
    /// Never reports success after a partial write. A peer that closed its
    /// end surfaces as an error (`BrokenPipe`, `ConnectionReset` or
    /// `WriteZero`).
    pub fn send_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }
}

impl<S: Read> LineTransport<S> {
    /// Read the next newline-delimited line.
    ///
    /// Consumes exactly the delimiter-inclusive span. A complete line occupies
    /// at most `max_len` bytes including its delimiter; `max_len` is clamped
    /// to the buffer capacity. A single call may perform zero or many
    /// underlying reads.
    pub fn read_line(&mut self, max_len: usize) -> io::Result<LineRead> {
        let max_len = max_len.clamp(1, self.capacity);
        let mut scanned = 0;

        loop {
            let window = self.buffer.len().min(max_len);
            if let Some(pos) = self.buffer[scanned..window].iter().position(|&b| b == DELIMITER) {
                let end = scanned + pos;
                let mut line = self.buffer.split_to(end + 1);
                line.truncate(end);
                return Ok(LineRead::Complete(line.freeze()));
            }
            scanned = window;

            if self.buffer.len() >= max_len {
                return Ok(LineRead::Overflow(self.buffer.split_to(max_len).freeze()));
            }

            match self.fill() {
                Ok(0) if self.buffer.is_empty() => return Ok(LineRead::Closed),
                Ok(0) => return Ok(LineRead::Truncated(self.buffer.split().freeze())),
                Ok(_) => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(LineRead::Incomplete),
                Err(e) => return Err(e),
            }
        }
    }

    /// Read exactly `len` bytes of binary payload.
    ///
    /// Buffered bytes are drained first, the remainder is read straight from
    /// the stream. Intended for blocking streams; on a non-blocking stream a
    /// would-block condition is returned as an error.
    pub fn read_exact(&mut self, len: usize) -> io::Result<ExactRead> {
        let mut out = BytesMut::with_capacity(len);
        let take = self.buffer.len().min(len);
        out.extend_from_slice(&self.buffer.split_to(take));

        while out.len() < len {
            let filled = out.len();
            out.resize(len, 0);
            match self.stream.read(&mut out[filled..]) {
                Ok(0) => {
                    out.truncate(filled);
                    break;
                },
                Ok(n) => out.truncate(filled + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => out.truncate(filled),
                Err(e) => return Err(e),
            }
        }

        Ok(if out.len() == len {
            ExactRead::Complete(out.freeze())
        } else if out.is_empty() {
            ExactRead::Closed
        } else {
            ExactRead::Short(out.freeze())
        })
    }

    /// One underlying read into the free tail of the receive buffer.
    fn fill(&mut self) -> io::Result<usize> {
        let filled = self.buffer.len();
        let room = self.capacity - filled;
        debug_assert!(room > 0, "fill called on a full buffer");

        self.buffer.resize(filled + room, 0);
        let result = self.stream.read(&mut self.buffer[filled..]);
        let read = result.as_ref().map_or(0, |n| *n);
        self.buffer.truncate(filled + read);
        result
    }
}
