//! # Zeta4G Bolt Proxy
//!
//! A transparent, protocol-aware reverse proxy for clustered Zeta4G graph
//! databases speaking the Bolt protocol, over TCP or WebSocket.
//!
//! ## What it does
//!
//! A naive TCP forwarder cannot proxy a Bolt cluster: transactions must
//! land on hosts of the right role, and every host wants its own
//! authentication. This proxy:
//!
//! - authenticates each client once and fans that authentication out to
//!   every cluster member, building a per-principal pool of ready backend
//!   connections;
//! - intercepts each transaction's first message to classify it as read
//!   or write and routes it using a periodically refreshed routing table;
//! - relays the resulting bidirectional message stream with verbatim
//!   framing, transaction boundaries, and idle timeouts.
//!
//! ## Modules
//!
//! - [`bolt`] - wire protocol: framing codec, tags, handshake, PackStream
//!   subset
//! - [`proxy`] - orchestration: sessions, routing, pooling, relays,
//!   listener
//!
//! ## Quick start
//!
//! ```text
//! zeta4g-proxy --bind localhost:8888 --uri bolt://cluster:7687 \
//!     --user zeta4g --password secret
//! ```
//!
//! Clients connect to the proxy exactly as they would to a single server;
//! the proxy mirrors whatever protocol version the backend advertises.

#![warn(missing_docs)]

pub mod bolt;
pub mod proxy;

pub use bolt::{BoltError, BoltFrame, BoltFrameCodec, BoltTag, BoltVersion};
pub use proxy::{Backend, ProxyConfig, ProxyError, ProxyResult, Session};
