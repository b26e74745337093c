// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Tactus - self-organizing LAN peer group with clock synchronization
//!
//! Every node runs a WebSocket listener and a WebSocket client at once,
//! advertises itself over DNS-SD and keeps negotiating with the peers it
//! observes until the group converges on a single elected coordinator.
//! The coordinator gossips its peer set and pings its clients; a layered
//! probe/response protocol then slaves every client's logical clock to
//! the coordinator's with sub-millisecond stability.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tactus::node::PeerNode;
//! use tactus::sync::ClockSync;
//!
//! fn main() -> tactus::Result<()> {
//!     let clock = Arc::new(ClockSync::new());
//!     let node = PeerNode::builder("myapp")
//!         .port(8001)
//!         .payload(clock.clone())
//!         .build()?;
//!
//!     loop {
//!         node.discover(250, 8000);   // election + liveness
//!         clock.sync(&node);          // clock probe while a client
//!         std::thread::sleep(std::time::Duration::from_millis(250));
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                       Application                             |
//! |        PeerNode (election)  |  ClockSync (payload)            |
//! +---------------------------------------------------------------+
//! |                     Coordinator layer                         |
//! |   peer registry | next-server hint | confirmed clients        |
//! +---------------------------------------------------------------+
//! |                        Wire layer                             |
//! |   tagged chunks/streams  |  control + payload sum types       |
//! +---------------------------------------------------------------+
//! |                      Infrastructure                           |
//! |   WebSocket listener/dialer  |  DNS-SD adapter  |  timers     |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`node::PeerNode`] | Listener + dialer + discovery + election in one handle |
//! | [`sync::ClockSync`] | Clock synchronizer riding on a node as its payload |
//! | [`peer::PeerRegistry`] | Name-ordered, TTL-pruned set of known peers |
//! | [`ser::Chunk`] / [`ser::Stream`] | Tagged little-endian wire codec |
//! | [`transport::WsListener`] / [`transport::WsDialer`] | Framed duplex links |

/// Crate-wide error and result types.
pub mod error;

/// Global configuration constants.
pub mod config;

/// Compile-time configurable logging (zero-cost when disabled).
pub mod logging;

/// Tagged byte chunks and streams (the wire codec).
pub mod ser;

/// Monotonic timers, interval gate and the logical timestamp scalar.
pub mod timing;

/// DNS-SD adapter: advertise this node, enumerate peers, resolve names.
pub mod discovery;

/// WebSocket transport surface (listener + dialer).
pub mod transport;

/// Known-peer bookkeeping (registry, sources, next-server hint).
pub mod peer;

/// Coordinator-control and clock-sync wire messages.
pub mod protocol;

/// The coordinator state machine.
pub mod node;

/// Clock synchronization over the payload channel.
pub mod sync;

pub use error::{Error, Result};
pub use node::{ClientState, NullPayload, Payload, PayloadLink, PeerNode};
pub use peer::{Host, Peer, PeerRegistry, PeerSource};
pub use ser::{Chunk, CodecError, Stream};
pub use sync::{ClockSync, MedianWindow, PrecisionTimer};
pub use timing::{IntervalGate, MonoTimer, TimeStamp};
pub use transport::{ConnectionId, WsDialer, WsListener};
