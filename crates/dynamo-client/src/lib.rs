//! Blocking client for the text command protocol a node's client-facing
//! connections speak (tag `0x00`, `Message::ClientCommand`).
//!
//! One TCP connection, one request outstanding at a time: a command is
//! written, then the reply is read off the same socket. Used by
//! `dynamo-cli`'s `repl`/`start` commands and by integration tests that
//! want to talk to a live node without going through the REPL.

mod error;

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use dynamo_wire::{Frame, Message};

pub use error::{ClientError, ClientResult};

const READ_CHUNK: usize = 4096;

/// A connected client session.
pub struct Client {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Client {
    /// Connects to a node listening at `addr` (e.g. `"127.0.0.1:13337"`).
    pub fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    /// Sets the socket's read/write timeout, applied to every subsequent
    /// `send_command` call.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> ClientResult<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Sends one textual command (e.g. `"get k"`, `"put k {} v"`,
    /// `"add-node host"`) and blocks for the matching reply.
    pub fn send_command(&mut self, command: &str) -> ClientResult<String> {
        let frame = Message::ClientCommand(command.to_string()).to_frame()?;
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        self.stream.write_all(&out)?;

        loop {
            if let Some(frame) = Frame::decode(&mut self.read_buf)? {
                let message = Message::from_frame(&frame)?;
                return match message {
                    Message::ClientCommand(text) => Ok(text),
                    other => Err(ClientError::Server(format!(
                        "unexpected reply message: {other:?}"
                    ))),
                };
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_config::NodeConfig;
    use dynamo_node::Server;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn spawn_node(port: u16, data_dir: &std::path::Path) {
        let config = NodeConfig {
            hostname: "127.0.0.1".to_string(),
            leader: None,
            tcp_port: port,
            data_dir: data_dir.to_path_buf(),
            replication_factor: 1,
            r: 1,
            w: 1,
            ..NodeConfig::default()
        };
        let mut server = Server::bind(&config).expect("bind");
        thread::spawn(move || {
            let _ = server.run();
        });
    }

    #[test]
    fn put_then_get_round_trips_through_a_live_node() {
        let dir = tempfile::tempdir().unwrap();
        let port = 23_456;
        spawn_node(port, dir.path());
        thread::sleep(StdDuration::from_millis(100));

        let mut client = Client::connect(("127.0.0.1", port)).unwrap();
        let put_reply = client.send_command("put greeting {} hello").unwrap();
        assert!(put_reply.starts_with("ok"), "unexpected reply: {put_reply}");

        let get_reply = client.send_command("get greeting").unwrap();
        assert!(get_reply.contains("hello"), "unexpected reply: {get_reply}");
    }
}
