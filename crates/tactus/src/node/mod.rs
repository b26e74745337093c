// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The coordinator state machine.
//!
//! Every [`PeerNode`] simultaneously runs a WebSocket listener and a
//! WebSocket dialer, advertises itself over DNS-SD and negotiates with
//! observed peers until the group converges on a single coordinator. A
//! driver calls [`discover`](PeerNode::discover) at a fixed cadence; one
//! invocation performs at most one outbound connection attempt and is
//! otherwise bounded by lock acquisition plus fixed-size work.
//!
//! # Roles
//!
//! A node is either in the **coordinator role** (listener accepting
//! clients) or the **client role** (dialer connected and confirmed),
//! never both outside the brief confirmation finalization. Election is by
//! group size with a lexicographic tie-break on host name, so any finite
//! fully-connected set of nodes converges on exactly one coordinator.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tactus::node::PeerNode;
//! use tactus::sync::ClockSync;
//!
//! # fn main() -> tactus::Result<()> {
//! let clock = Arc::new(ClockSync::new());
//! let node = PeerNode::builder("myapp")
//!     .port(8001)
//!     .payload(clock.clone())
//!     .build()?;
//!
//! loop {
//!     node.discover(250, 8000);
//!     clock.sync(&node);
//!     std::thread::sleep(std::time::Duration::from_millis(250));
//! }
//! # }
//! ```

mod election;
mod payload;
mod state;

pub use election::ClientState;
pub use payload::{NullPayload, Payload, PayloadLink};

use crate::config::{DEFAULT_PORT, DISCOVERY_RESTART_SECS};
use crate::discovery::Discovery;
use crate::error::Result;
use crate::peer::{Peer, PeerSource};
use crate::protocol::ToServerMsg;
use crate::ser::Chunk;
use crate::transport::{ClientEvents, ConnectionId, ServerEvents, WsDialer, WsListener};
use crate::{debug, warn};
use state::NodeState;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A self-organizing peer: listener, dialer, discovery and election in
/// one handle.
///
/// All methods are thread-safe, but [`discover`](Self::discover) is meant
/// to be driven from a single thread.
pub struct PeerNode {
    shared: Arc<NodeState>,
}

/// Builder for [`PeerNode`].
pub struct NodeBuilder {
    reg_name: String,
    port: u16,
    host_name: Option<String>,
    discovery: bool,
    payload: Arc<dyn Payload>,
}

impl NodeBuilder {
    fn new(reg_name: &str) -> Self {
        Self {
            reg_name: reg_name.to_owned(),
            port: DEFAULT_PORT,
            host_name: None,
            discovery: true,
            payload: Arc::new(NullPayload),
        }
    }

    /// Listener / advertisement port. Port 0 picks an ephemeral port at
    /// listener start; combine that with `.discovery(false)` since the
    /// advertisement is registered before the port is known.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the advertised host name (the OS hostname by default).
    /// Needed when several nodes share one machine.
    pub fn host_name(mut self, name: impl Into<String>) -> Self {
        self.host_name = Some(name.into());
        self
    }

    /// Disable DNS-SD and rely on seeded peers ([`PeerNode::add_peer`])
    /// instead, for networks without multicast.
    pub fn discovery(mut self, enabled: bool) -> Self {
        self.discovery = enabled;
        self
    }

    /// Install the application payload collaborator.
    pub fn payload(mut self, payload: Arc<dyn Payload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Result<PeerNode> {
        let discovery = Discovery::new(&self.reg_name, self.port, self.host_name)?;
        Ok(PeerNode {
            shared: Arc::new(NodeState::new(discovery, self.discovery, self.payload)),
        })
    }
}

impl PeerNode {
    pub fn builder(reg_name: &str) -> NodeBuilder {
        NodeBuilder::new(reg_name)
    }

    /// Periodic step of the state machine.
    ///
    /// `tick_ms` is the caller's invocation interval (used to age the
    /// registry), `max_peer_age_ms` the age past which peers are pruned.
    /// Makes at most one outbound connection attempt per call.
    pub fn discover(&self, tick_ms: u32, max_peer_age_ms: u32) {
        let s = &*self.shared;

        // Already a client of some coordinator
        if s.dialer_connected() {
            if s.client_state.get() == ClientState::Failed {
                debug!("node: rejected by server, dropping the link");
                s.drop_dialer();
                // Fall through to self-host bootstrap below
            } else {
                if s.client_state.get() == ClientState::Confirmed {
                    s.finalize_confirmation();
                }
                if let Some((server, port)) = s.dialer_endpoint() {
                    s.peers.add(Peer::new(server, port, PeerSource::Server));
                }
                s.peers.advance(tick_ms);
                s.peers.prune(max_peer_age_ms);
                return;
            }
        } else {
            // Directed reconnect: a Switch or rejection named our next
            // server; skip negotiation, the redirect was pre-negotiated.
            let next = s.next_server.get();
            if !next.is_empty() {
                self.try_connect(next.name(), next.port(), true);
                s.peers.advance(tick_ms);
                s.peers.prune(max_peer_age_ms);
                return;
            }
        }

        self.bootstrap_step(tick_ms, max_peer_age_ms);
    }

    /// Branches 3-8: self-host, ingest discovery, attempt one outbound
    /// connection, coordinator maintenance, registry aging.
    fn bootstrap_step(&self, tick_ms: u32, max_peer_age_ms: u32) {
        let s = &*self.shared;

        if !s.listener_running() {
            self.start_listener();
        }

        if s.discovery_enabled && !s.discovery.is_running() {
            match s.discovery.start() {
                Ok(()) => s.discovery_restart.lock().start(),
                Err(err) => warn!("node: discovery start failed: {}", err),
            }
        }

        // Ingest discovery sightings into the registry
        if s.discovery.is_running() {
            for found in s.discovery.list_peers() {
                let peer = if found.host.is_empty() {
                    Peer::new(
                        rewrite_unresolved_name(&found.name),
                        found.port,
                        PeerSource::Unresolved,
                    )
                } else {
                    Peer::new(found.host, found.port, PeerSource::Discovered)
                };
                s.peers.add(peer);
            }
        }

        // Try available servers in name order; first success wins
        for peer in s.peers.snapshot() {
            if peer.is_client() || peer.is_unresolved() || s.is_self(peer.name()) {
                continue;
            }
            if self.try_connect(peer.name(), peer.port(), false) {
                break;
            }
            s.discovery.resolve(peer.name());
        }

        // Restart discovery periodically so stale advertisements clear
        if s.discovery.is_running()
            && s.discovery_restart.lock().interval() > DISCOVERY_RESTART_SECS
        {
            s.discovery.stop();
        }

        if s.server_connected() {
            s.send_peer_list();
            s.ping_clients();
        }

        s.peers.advance(tick_ms);
        s.peers.prune(max_peer_age_ms);
    }

    /// Dial a host. On success the link starts `Unconfirmed` and either
    /// negotiates (`direct == false`) or finalizes immediately (`direct ==
    /// true`, used when the reconnection was pre-negotiated).
    fn try_connect(&self, host: &str, port: u16, direct: bool) -> bool {
        let s = &*self.shared;

        // Clear out a dead link before installing a new one
        s.drop_dialer();

        let handler: Arc<dyn ClientEvents> = self.shared.clone();
        match WsDialer::connect(host, port, handler) {
            Ok(dialer) => {
                *s.dialer.write() = Some(dialer);
                s.client_state.set(ClientState::Unconfirmed);
                if direct {
                    s.finalize_confirmation();
                } else {
                    let negotiate = ToServerMsg::Negotiate {
                        name: s.host_name(),
                        port: s.advertise_port(),
                        num_clients: s.confirmed.len() as i32,
                    };
                    s.send_control_from_client(&negotiate);
                }
                true
            }
            Err(err) => {
                debug!("node: connect to {}:{} failed: {}", host, port, err);
                false
            }
        }
    }

    fn start_listener(&self) {
        let s = &*self.shared;
        let handler: Arc<dyn ServerEvents> = self.shared.clone();
        match WsListener::start(s.advertise_port(), handler) {
            Ok(listener) => {
                // Port 0 resolves to the bound port here
                s.advertise_port.store(listener.port(), Ordering::Release);
                *s.listener.write() = Some(listener);
            }
            Err(err) => warn!("node: listener start failed: {}", err),
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Status line: own name with client counts while coordinating, the
    /// coordinator's name while a client, otherwise `"Disconnected"`.
    pub fn server_name(&self) -> String {
        self.shared.server_status()
    }

    /// This node's host name (OS hostname or the builder override).
    pub fn host_name(&self) -> String {
        self.shared.host_name()
    }

    /// The advertised listener port.
    pub fn port(&self) -> u16 {
        self.shared.advertise_port()
    }

    /// Diagnostic listing of the registry, one peer per line.
    pub fn peer_names(&self) -> String {
        self.shared.peer_names()
    }

    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    pub fn client_state(&self) -> ClientState {
        self.shared.client_state.get()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listener_running()
    }

    pub fn is_client_connected(&self) -> bool {
        self.shared.dialer_connected()
    }

    /// Seed the registry with a known peer, as if discovery had resolved
    /// it. The primary bootstrap path on networks without multicast.
    pub fn add_peer(&self, name: &str, port: u16) {
        self.shared
            .peers
            .add(Peer::new(name, port, PeerSource::Discovered));
    }

    /// Tear down both roles: dialer, listener and discovery.
    pub fn shutdown(&self) {
        self.shared.drop_dialer();
        self.shared.drop_listener();
        self.shared.discovery.stop();
    }

    // ========================================================================
    // Payload sends (the "-" family), mirroring the internal control path
    // ========================================================================

    /// Send an application payload to one of our clients.
    pub fn send_to_client(&self, id: ConnectionId, body: Chunk) -> bool {
        PayloadLink::send_to_client(&*self.shared, id, body)
    }

    /// Broadcast an application payload to all of our clients.
    pub fn send_from_server(&self, body: Chunk) -> bool {
        PayloadLink::send_from_server(&*self.shared, body)
    }

    /// Send an application payload to our coordinator.
    pub fn send_from_client(&self, body: Chunk) -> bool {
        PayloadLink::send_from_client(&*self.shared, body)
    }
}

impl PayloadLink for PeerNode {
    fn send_to_client(&self, id: ConnectionId, body: Chunk) -> bool {
        PayloadLink::send_to_client(&*self.shared, id, body)
    }

    fn send_from_server(&self, body: Chunk) -> bool {
        PayloadLink::send_from_server(&*self.shared, body)
    }

    fn send_from_client(&self, body: Chunk) -> bool {
        PayloadLink::send_from_client(&*self.shared, body)
    }

    fn client_connected(&self) -> bool {
        PayloadLink::client_connected(&*self.shared)
    }
}

impl Drop for PeerNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Discovery renders an unresolved instance of `host.local.` as
/// `host-local`; rewrite it back into a resolvable candidate name.
fn rewrite_unresolved_name(name: &str) -> String {
    match name.strip_suffix("-local") {
        Some(stem) => format!("{}.local.", stem),
        None => name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PeerRecord, ToClientMsg};

    fn test_node(host: &str) -> PeerNode {
        PeerNode::builder("tactus-test")
            .port(0)
            .host_name(host)
            .discovery(false)
            .build()
            .expect("Build node")
    }

    #[test]
    fn test_rewrite_unresolved_name() {
        assert_eq!(rewrite_unresolved_name("studio-local"), "studio.local.");
        assert_eq!(rewrite_unresolved_name("studio"), "studio");
        assert_eq!(rewrite_unresolved_name("local"), "local");
    }

    #[test]
    fn test_fresh_node_reports_disconnected() {
        let node = test_node("alpha");
        assert_eq!(node.server_name(), "Disconnected");
        assert_eq!(node.client_state(), ClientState::Unconfirmed);
        assert!(!node.is_listening());
        assert!(!node.is_client_connected());
    }

    #[test]
    fn test_confirm_ack_registers_client() {
        let node = test_node("alpha");
        node.shared.handle_to_server(3, ToServerMsg::Confirm);
        node.shared.handle_to_server(4, ToServerMsg::Confirm);
        assert_eq!(node.shared.confirmed.len(), 2);

        // A closed link drops out of the confirmed set
        ServerEvents::on_close(&*node.shared, 3);
        assert_eq!(node.shared.confirmed.len(), 1);
    }

    #[test]
    fn test_negotiate_from_larger_group_installs_next_server() {
        let node = test_node("bravo");
        node.shared.handle_to_server(
            1,
            ToServerMsg::Negotiate {
                name: "zulu".into(),
                port: 9001,
                num_clients: 3,
            },
        );

        let next = node.shared.next_server.get();
        assert_eq!(next.name(), "zulu");
        assert_eq!(next.port(), 9001);
    }

    #[test]
    fn test_negotiate_tie_rejects_when_peer_name_prefers() {
        let node = test_node("bravo");
        // Tie on size, peer name sorts first: we yield
        node.shared.handle_to_server(
            1,
            ToServerMsg::Negotiate {
                name: "alpha".into(),
                port: 9001,
                num_clients: 0,
            },
        );
        assert_eq!(node.shared.next_server.get().name(), "alpha");
    }

    #[test]
    fn test_negotiate_from_smaller_group_is_confirmed() {
        let node = test_node("bravo");
        node.shared.handle_to_server(3, ToServerMsg::Confirm);
        node.shared.handle_to_server(
            1,
            ToServerMsg::Negotiate {
                name: "alpha".into(),
                port: 9001,
                num_clients: 0,
            },
        );
        // Confirmed as our client: no redirection hint installed
        assert!(node.shared.next_server.get().is_empty());
    }

    #[test]
    fn test_ping_records_client_peer() {
        let node = test_node("alpha");
        node.shared.handle_to_server(
            1,
            ToServerMsg::Ping {
                name: "bravo".into(),
                port: 8001,
            },
        );

        let peers = node.shared.peers.snapshot();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name(), "bravo");
        assert_eq!(peers[0].source(), PeerSource::Client);
    }

    #[test]
    fn test_confirm_decision_drives_client_state() {
        let node = test_node("alpha");
        node.shared.handle_to_client(ToClientMsg::Confirm { accept: true });
        assert_eq!(node.client_state(), ClientState::Confirmed);

        node.shared.handle_to_client(ToClientMsg::Confirm { accept: false });
        assert_eq!(node.client_state(), ClientState::Failed);
    }

    #[test]
    fn test_switch_to_self_is_ignored() {
        let node = test_node("alpha");
        node.shared.handle_to_client(ToClientMsg::Switch {
            host: "alpha".into(),
            port: 8001,
        });
        assert!(node.shared.next_server.get().is_empty());

        // The mDNS rendering of our own name is also caught
        node.shared.handle_to_client(ToClientMsg::Switch {
            host: "Alpha.local.".into(),
            port: 8001,
        });
        assert!(node.shared.next_server.get().is_empty());

        node.shared.handle_to_client(ToClientMsg::Switch {
            host: "bravo".into(),
            port: 8001,
        });
        assert_eq!(node.shared.next_server.get().name(), "bravo");
    }

    #[test]
    fn test_peers_gossip_ingested_as_remote() {
        let node = test_node("alpha");
        node.shared.handle_to_client(ToClientMsg::Peers(vec![
            PeerRecord {
                name: "bravo".into(),
                port: 8001,
                age_ms: 1200,
            },
            PeerRecord {
                name: "charlie".into(),
                port: 8002,
                age_ms: 0,
            },
        ]));

        let peers = node.shared.peers.snapshot();
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|p| p.source() == PeerSource::Remote));
        assert_eq!(peers[0].name(), "bravo");
        assert_eq!(peers[0].age_ms(), 1200);
    }

    #[test]
    fn test_lone_node_bootstraps_listener() {
        // Scenario: a lone node keeps self-hosting, no coordinator in
        // sight. Ephemeral port, discovery off.
        let node = test_node("alpha");
        node.discover(250, 8000);

        assert!(node.is_listening());
        assert!(node.port() > 0);
        assert_eq!(node.server_name(), "Disconnected"); // no clients yet
        node.shutdown();
        assert!(!node.is_listening());
    }

    #[test]
    fn test_registry_ages_across_discover_ticks() {
        let node = test_node("alpha");
        // An unresolvable name: the dial fails fast, the entry just ages
        node.add_peer("no-such-host.invalid", 9);

        node.discover(3000, 8000);
        node.discover(3000, 8000);
        assert_eq!(node.peer_count(), 1);
        node.discover(3000, 8000);
        // 9000 ms of age exceeds the 8000 ms bound
        assert_eq!(node.peer_count(), 0);
        node.shutdown();
    }
}
