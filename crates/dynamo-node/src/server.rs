//! The node's single `mio` poll loop, per §2/§5.
//!
//! Everything about this process is decided on one thread: accept, read,
//! write, and periodic tick events for quorum/membership timeouts and
//! handoff retries all funnel through here and into [`Dispatcher`]. There
//! is no async runtime and no thread pool — mirroring the prior generation
//! server's `core_runtime`, just without its multi-core dispatch.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use dynamo_config::NodeConfig;
use dynamo_ring::Ring;
use dynamo_storage::Store;
use dynamo_types::Hostname;

use crate::connection::{Connection, ConnectionKind};
use crate::dispatcher::{Dispatcher, Effect};
use crate::error::{ServerError, ServerResult};
use crate::handoff::HandoffManager;

const LISTENER_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

const CONNECTION_BUFFER_SIZE: usize = 8 * 1024;
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs the node until a shutdown signal arrives or an unrecoverable error
/// forces a [`ServerError::Fatal`] abort, per the error taxonomy's fourth
/// category (§7): a fatal error is logged and the process exits, trusting
/// the operator or supervisor to restart it with a clean slate.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    signals: signal_hook_mio::v1_0::Signals,
    shutdown: Arc<AtomicBool>,
    connections: HashMap<Token, Connection>,
    host_tokens: HashMap<Hostname, Token>,
    next_token: usize,
    dispatcher: Dispatcher,
    peer_port: u16,
    tick_interval: Duration,
    handoff_retry_period: Duration,
    last_handoff_retry: Instant,
}

impl Server {
    pub fn bind(config: &NodeConfig) -> ServerResult<Self> {
        let addr: SocketAddr = format!("0.0.0.0:{}", config.tcp_port)
            .parse()
            .map_err(|e| ServerError::Fatal(format!("invalid tcp_port: {e}")))?;
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let mut signals = signal_hook_mio::v1_0::Signals::new([
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGTERM,
        ])
        .map_err(|e| ServerError::Fatal(format!("failed to install signal handlers: {e}")))?;
        poll.registry()
            .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;

        let data_dir = config.data_dir.clone();
        let self_host = config.hostname();
        let ring_path = data_dir.join(format!("{}.ring", self_host.as_str()));
        let ring = if ring_path.exists() {
            let text = std::fs::read_to_string(&ring_path)?;
            Ring::from_snapshot(&text, config.replication_factor)
        } else {
            let mut ring = Ring::new(config.replication_factor);
            ring.add(self_host.clone())?;
            ring
        };

        let store = Store::open(&data_dir, self_host.clone())?;
        let handoff = HandoffManager::open(&data_dir, &self_host)?;

        let dispatcher = Dispatcher::new(
            self_host,
            config.leader_hostname(),
            config.replication_factor,
            config.r,
            config.w,
            Duration::from_secs_f64(config.request_timelimit),
            data_dir.clone(),
            ring,
            store,
            handoff,
        );

        tracing::info!(addr = %addr, "node listening");

        Ok(Self {
            poll,
            listener,
            signals,
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: HashMap::new(),
            host_tokens: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            dispatcher,
            peer_port: config.tcp_port,
            tick_interval: Duration::from_millis(200),
            handoff_retry_period: Duration::from_secs(config.handoff_retry_period),
            last_handoff_retry: Instant::now(),
        })
    }

    pub fn run(&mut self) -> ServerResult<()> {
        let mut events = Events::with_capacity(1024);
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.tick_interval)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_all()?,
                    SIGNAL_TOKEN => self.drain_signals(),
                    token => self.handle_connection_event(token),
                }
            }

            self.run_tick();
        }
        tracing::info!("shutdown signal received, stopping");
        Ok(())
    }

    fn drain_signals(&mut self) {
        for signal in self.signals.pending() {
            tracing::info!(signal, "received shutdown signal");
            self.shutdown.store(true, Ordering::Relaxed);
        }
    }

    fn accept_all(&mut self) -> ServerResult<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    self.register_connection(stream, ConnectionKind::Unknown);
                    tracing::debug!(%addr, "accepted connection");
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn register_connection(&mut self, mut stream: TcpStream, kind: ConnectionKind) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        let interest = Interest::READABLE;
        if let Err(e) = self.poll.registry().register(&mut stream, token, interest) {
            tracing::warn!(error = %e, "failed to register connection with poll");
        }
        let mut connection = Connection::new(token, stream, CONNECTION_BUFFER_SIZE);
        connection.kind = kind;
        self.connections.insert(token, connection);
        token
    }

    /// Finds (or opens) the connection used to reach `host`, dialing a new
    /// outbound socket if none is cached yet.
    fn connection_for_host(&mut self, host: &Hostname) -> ServerResult<Token> {
        if let Some(token) = self.host_tokens.get(host) {
            if self.connections.contains_key(token) {
                return Ok(*token);
            }
            self.host_tokens.remove(host);
        }
        let addr = format!("{}:{}", self.dispatcher.ring.hostname_to_ip(host)?.as_str(), self.peer_port);
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| ServerError::Fatal(format!("invalid peer address {addr}: {e}")))?;
        let stream = TcpStream::connect(socket_addr)?;
        let token = self.register_connection(stream, ConnectionKind::Peer);
        self.host_tokens.insert(host.clone(), token);
        Ok(token)
    }

    fn handle_connection_event(&mut self, token: Token) {
        if self.drain_writes(token).is_err() {
            self.close_connection(token);
            return;
        }

        let messages = match self.drain_reads(token) {
            Ok(m) => m,
            Err(_) => {
                self.close_connection(token);
                return;
            }
        };

        let from_host = self.peer_hostname(token);
        let now = Instant::now();
        let mut effects = Vec::new();
        for message in messages {
            let from = from_host.clone().unwrap_or_else(|| Hostname::from("unknown"));
            effects.extend(self.dispatcher.handle_message(from, token, message, now));
        }
        self.apply_effects(effects);
        self.reregister(token);
    }

    /// Resolves `token` to the member hostname on its other end.
    ///
    /// For connections this node dialed itself, the hostname is already
    /// cached. For an inbound connection from a peer, there was no
    /// handshake to announce it — the peer's socket address is matched
    /// against the ring's membership, since a `Hostname` already doubles as
    /// its own dial target (`Ring::hostname_to_ip` is the identity
    /// function; see its doc comment).
    fn peer_hostname(&self, token: Token) -> Option<Hostname> {
        if let Some(host) = self.host_tokens.iter().find(|(_, t)| **t == token).map(|(h, _)| h.clone()) {
            return Some(host);
        }
        let connection = self.connections.get(&token)?;
        let ip = connection.stream.peer_addr().ok()?.ip().to_string();
        self.dispatcher.ring.members().find(|h| h.as_str() == ip).cloned()
    }

    fn drain_reads(&mut self, token: Token) -> ServerResult<Vec<dynamo_wire::Message>> {
        let Some(connection) = self.connections.get_mut(&token) else {
            return Ok(vec![]);
        };
        if !connection.read()? {
            return Err(ServerError::ConnectionClosed);
        }
        connection.touch();
        let mut messages = Vec::new();
        while let Some(message) = connection.try_decode_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    fn drain_writes(&mut self, token: Token) -> ServerResult<()> {
        let Some(connection) = self.connections.get_mut(&token) else {
            return Ok(());
        };
        connection.write()?;
        Ok(())
    }

    fn reregister(&mut self, token: Token) {
        let Some(connection) = self.connections.get_mut(&token) else {
            return;
        };
        if connection.closing && !connection.has_pending_data() {
            self.close_connection(token);
            return;
        }
        let interest = connection.interest();
        if let Err(e) = self
            .poll
            .registry()
            .reregister(&mut connection.stream, token, interest)
        {
            tracing::warn!(error = %e, "failed to reregister connection");
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut connection) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut connection.stream);
        }
        self.host_tokens.retain(|_, t| *t != token);
    }

    fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.apply_effect(effect);
        }
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::SendToHost { to, message } => match self.connection_for_host(&to) {
                Ok(token) => self.queue_message(token, &message),
                Err(e) => tracing::warn!(error = %e, host = %to, "failed to reach peer"),
            },
            Effect::ReplyText { token, text } => {
                self.queue_message(token, &dynamo_wire::Message::ClientCommand(text));
            }
            Effect::FinalReply { token, corr_id, text } => {
                let wrapped = match self.connections.get(&token).map(|c| c.kind) {
                    Some(ConnectionKind::Peer) => {
                        dynamo_wire::Message::ResponseForForward(dynamo_wire::ResponseForForward {
                            corr_id,
                            body: text,
                        })
                    }
                    _ => dynamo_wire::Message::ClientCommand(text),
                };
                self.queue_message(token, &wrapped);
            }
            Effect::Close { token } => {
                if let Some(connection) = self.connections.get_mut(&token) {
                    connection.closing = true;
                }
                self.reregister(token);
            }
        }
    }

    fn queue_message(&mut self, token: Token, message: &dynamo_wire::Message) {
        let Some(connection) = self.connections.get_mut(&token) else {
            return;
        };
        if let Err(e) = connection.queue_message(message) {
            tracing::warn!(error = %e, "failed to encode outgoing message");
            return;
        }
        self.reregister(token);
    }

    fn run_tick(&mut self) {
        let now = Instant::now();
        let effects = self.dispatcher.tick(now);
        self.apply_effects(effects);

        if now.duration_since(self.last_handoff_retry) >= self.handoff_retry_period {
            self.last_handoff_retry = now;
            let effects = self.dispatcher.retry_handoffs();
            self.apply_effects(effects);
        }

        let stale: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.closing || c.is_idle(IDLE_TIMEOUT))
            .map(|(token, _)| *token)
            .collect();
        for token in stale {
            self.close_connection(token);
        }
    }
}
