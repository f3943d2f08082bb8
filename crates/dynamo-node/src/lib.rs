//! # dynamo-node: Dynamo-style key-value store node daemon
//!
//! This crate provides the TCP server that exposes a Dynamo-style
//! replicated key-value store over the network using the binary wire
//! protocol defined in `dynamo-wire`.
//!
//! ## Architecture
//!
//! The server uses `mio` for non-blocking I/O with a single poll-based
//! event loop: no async runtime, no thread pool. Socket and timer events
//! funnel into [`Dispatcher`], which holds all decision logic (routing,
//! quorum bookkeeping, membership 2PC, hinted handoff) without touching a
//! socket itself — [`Server`] is the only thing that owns `mio::Poll`.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         dynamo-node                          │
//! │  ┌─────────────┐   ┌─────────────┐   ┌────────────────────┐  │
//! │  │  Listener   │ → │ Connections │ → │     Dispatcher     │  │
//! │  │  (TCP)      │   │ (mio poll)  │   │ (ring/store/2PC)   │  │
//! │  └─────────────┘   └─────────────┘   └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use dynamo_node::Server;
//! use dynamo_config::NodeConfig;
//!
//! let config = NodeConfig::load()?;
//! let mut server = Server::bind(&config)?;
//! server.run()?;
//! ```

mod connection;
mod coordinator;
mod dispatcher;
mod error;
mod handoff;
mod membership;
mod server;

pub use connection::{Connection, ConnectionKind};
pub use coordinator::{Outcome, RequestCoordinator, ResponseData, TimeoutOutcome};
pub use dispatcher::{Dispatcher, Effect};
pub use error::{ServerError, ServerResult};
pub use handoff::{HandoffManager, PendingWrite};
pub use membership::{MembershipError, MembershipManager, ReadyToCommit};
pub use server::Server;
