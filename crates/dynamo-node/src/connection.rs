//! Connection state management.

use std::io::{self, Read, Write};
use std::time::Instant;

use bytes::BytesMut;
use dynamo_wire::{Frame, FRAME_HEADER_SIZE, Message};
use mio::net::TcpStream;
use mio::{Interest, Token};

use crate::error::ServerResult;

/// What kind of peer is on the other end of a connection.
///
/// A freshly accepted socket doesn't announce itself — the first decoded
/// tag settles it. A `ClientCommand` (`0x00`) marks a `Client`; any other
/// tag marks a `Peer`. Mirrors the original prototype's habit of sorting
/// sockets into `client_sockets`/`peer_sockets` only once their first
/// message has been read, rather than requiring an explicit handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Unknown,
    Client,
    Peer,
}

/// State of one accepted or outbound connection.
pub struct Connection {
    #[allow(dead_code)]
    pub token: Token,
    pub stream: TcpStream,
    pub read_buf: BytesMut,
    pub write_buf: BytesMut,
    pub closing: bool,
    pub last_activity: Instant,
    pub kind: ConnectionKind,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, buffer_size: usize) -> Self {
        Self {
            token,
            stream,
            read_buf: BytesMut::with_capacity(buffer_size),
            write_buf: BytesMut::with_capacity(buffer_size),
            closing: false,
            last_activity: Instant::now(),
            kind: ConnectionKind::Unknown,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle(&self, timeout: std::time::Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Reads all currently available data from the socket into `read_buf`.
    ///
    /// Returns `true` if the connection is still open.
    pub fn read(&mut self) -> io::Result<bool> {
        let mut temp_buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut temp_buf) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&temp_buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) => return Err(e),
            }
        }
    }

    /// Flushes as much of `write_buf` to the socket as it will currently
    /// accept. Returns `true` once the buffer has fully drained.
    pub fn write(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    ));
                }
                Ok(n) => {
                    let _ = self.write_buf.split_to(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Attempts to decode one message from the read buffer, classifying an
    /// as-yet-`Unknown` connection on its first successful decode.
    pub fn try_decode_message(&mut self) -> ServerResult<Option<Message>> {
        let frame = Frame::decode(&mut self.read_buf)?;
        match frame {
            Some(frame) => {
                let message = Message::from_frame(&frame)?;
                if self.kind == ConnectionKind::Unknown {
                    self.kind = match message {
                        Message::ClientCommand(_) => ConnectionKind::Client,
                        _ => ConnectionKind::Peer,
                    };
                }
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    pub fn queue_message(&mut self, message: &Message) -> ServerResult<()> {
        let frame = message.to_frame()?;
        frame.encode(&mut self.write_buf);
        Ok(())
    }

    pub fn interest(&self) -> Interest {
        if self.write_buf.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    pub fn has_pending_data(&self) -> bool {
        self.read_buf.len() >= FRAME_HEADER_SIZE
    }
}
