// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared node state and the ingress side of the coordinator protocol.
//!
//! One `NodeState` is shared between the driver thread (via
//! [`PeerNode`](super::PeerNode)), the listener's connection threads and
//! the dialer thread. Lock acquisition order, outermost first:
//!
//! 1. transport slot (`listener` / `dialer`, read for sends, write only
//!    to install or remove a link),
//! 2. peer registry,
//! 3. confirmed-client set,
//! 4. next-server hint.
//!
//! Paths that mutate a slot take the write lock up front, swap the value
//! out and release before joining threads, so a join never happens under
//! a lock. Ingress handlers take slot locks only in read mode and never
//! hold two locks at once outside this order.

use super::election::{
    canonical_host, should_confirm, ClientState, ClientStateCell, ConfirmedClients,
};
use super::payload::{Payload, PayloadLink};
use crate::config::FINALIZE_DRAIN;
use crate::discovery::Discovery;
use crate::peer::{NextServer, Peer, PeerRegistry, PeerSource};
use crate::protocol::{PeerRecord, ToClientMsg, ToServerMsg, CONTROL_TAG, PAYLOAD_TAG};
use crate::ser::{Chunk, Stream};
use crate::timing::MonoTimer;
use crate::transport::{ClientEvents, ConnectionId, ServerEvents, WsDialer, WsListener};
use crate::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

pub(super) struct NodeState {
    pub(super) discovery: Discovery,
    pub(super) discovery_enabled: bool,
    pub(super) advertise_port: AtomicU16,
    pub(super) listener: RwLock<Option<WsListener>>,
    pub(super) dialer: RwLock<Option<WsDialer>>,
    pub(super) peers: PeerRegistry,
    pub(super) confirmed: ConfirmedClients,
    pub(super) next_server: NextServer,
    pub(super) client_state: ClientStateCell,
    pub(super) discovery_restart: Mutex<MonoTimer>,
    pub(super) payload: Arc<dyn Payload>,
}

impl NodeState {
    pub(super) fn new(
        discovery: Discovery,
        discovery_enabled: bool,
        payload: Arc<dyn Payload>,
    ) -> Self {
        Self {
            advertise_port: AtomicU16::new(discovery.port()),
            discovery,
            discovery_enabled,
            listener: RwLock::new(None),
            dialer: RwLock::new(None),
            peers: PeerRegistry::new(),
            confirmed: ConfirmedClients::new(),
            next_server: NextServer::new(),
            client_state: ClientStateCell::new(),
            discovery_restart: Mutex::new(MonoTimer::new()),
            payload,
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub(super) fn host_name(&self) -> String {
        self.discovery.host_name().to_owned()
    }

    pub(super) fn advertise_port(&self) -> u16 {
        self.advertise_port.load(Ordering::Acquire)
    }

    pub(super) fn is_self(&self, peer_name: &str) -> bool {
        canonical_host(peer_name) == canonical_host(self.discovery.host_name())
    }

    // ========================================================================
    // Role queries
    // ========================================================================

    pub(super) fn dialer_connected(&self) -> bool {
        self.dialer.read().as_ref().is_some_and(|d| d.connected())
    }

    /// Name and port of the server we are dialed into, if any.
    pub(super) fn dialer_endpoint(&self) -> Option<(String, u16)> {
        self.dialer
            .read()
            .as_ref()
            .filter(|d| d.connected())
            .map(|d| (d.server_name().to_owned(), d.port()))
    }

    pub(super) fn listener_running(&self) -> bool {
        self.listener.read().is_some()
    }

    pub(super) fn client_count(&self) -> usize {
        self.listener
            .read()
            .as_ref()
            .map_or(0, WsListener::client_count)
    }

    /// Coordinator role: the listener has at least one connected client.
    pub(super) fn server_connected(&self) -> bool {
        self.client_count() > 0
    }

    // ========================================================================
    // Sends (family tag + encoded body)
    // ========================================================================

    fn frame(tag: &str, body: Chunk) -> Chunk {
        let mut frame = Chunk::with_capacity(body.len() + tag.len() + 4);
        frame.put_str(tag);
        frame.put_chunk(&body);
        frame
    }

    pub(super) fn send_control_to_client(&self, id: ConnectionId, msg: &ToClientMsg) -> bool {
        let frame = Self::frame(CONTROL_TAG, msg.encode());
        let listener = self.listener.read();
        match &*listener {
            Some(listener) => listener.send_to(id, frame.as_bytes()),
            None => false,
        }
    }

    pub(super) fn broadcast_control(&self, msg: &ToClientMsg) {
        let frame = Self::frame(CONTROL_TAG, msg.encode());
        let listener = self.listener.read();
        if let Some(listener) = &*listener {
            listener.broadcast(frame.as_bytes());
        }
    }

    pub(super) fn send_control_from_client(&self, msg: &ToServerMsg) -> bool {
        let frame = Self::frame(CONTROL_TAG, msg.encode());
        let dialer = self.dialer.read();
        match &*dialer {
            Some(dialer) => dialer.send(frame.as_bytes()),
            None => false,
        }
    }

    // ========================================================================
    // Link teardown (swap out under the write lock, join outside it)
    // ========================================================================

    pub(super) fn drop_dialer(&self) {
        let dialer = self.dialer.write().take();
        if let Some(dialer) = dialer {
            dialer.disconnect();
        }
    }

    pub(super) fn drop_listener(&self) {
        let listener = self.listener.write().take();
        if let Some(listener) = listener {
            listener.stop();
        }
    }

    // ========================================================================
    // Coordinator-side protocol
    // ========================================================================

    pub(super) fn handle_to_server(&self, id: ConnectionId, msg: ToServerMsg) {
        match msg {
            ToServerMsg::Negotiate {
                name,
                port,
                num_clients,
            } => {
                let local = self.confirmed.len() as i32;
                let own_name = self.host_name();
                let confirm = should_confirm(local, num_clients, &own_name, &name);
                debug!(
                    "node: negotiate from {} ({} clients vs our {}): confirm={}",
                    name, num_clients, local, confirm
                );
                self.send_control_to_client(id, &ToClientMsg::Confirm { accept: confirm });
                if !confirm {
                    self.set_next_server(&name, port);
                }
            }
            ToServerMsg::Ping { name, port } => {
                self.peers.add(Peer::new(name, port, PeerSource::Client));
            }
            ToServerMsg::Confirm => {
                self.confirmed.add(id);
            }
        }
    }

    // ========================================================================
    // Client-side protocol
    // ========================================================================

    pub(super) fn handle_to_client(&self, msg: ToClientMsg) {
        match msg {
            ToClientMsg::Confirm { accept } => {
                if accept {
                    self.client_state.set(ClientState::Confirmed);
                } else {
                    // Rejection: the next discover() tick disconnects us.
                    self.client_state.set(ClientState::Failed);
                }
            }
            ToClientMsg::Switch { host, port } => {
                debug!("node: redirected to {}:{}", host, port);
                self.set_next_server(&host, port);
            }
            ToClientMsg::Ping => {
                let answer = ToServerMsg::Ping {
                    name: self.host_name(),
                    port: self.advertise_port(),
                };
                self.send_control_from_client(&answer);
            }
            ToClientMsg::Peers(records) => {
                for record in records {
                    self.peers.add(Peer::with_age(
                        record.name,
                        record.port,
                        PeerSource::Remote,
                        record.age_ms,
                    ));
                }
            }
        }
    }

    pub(super) fn set_next_server(&self, server: &str, port: u16) {
        // Never install ourselves as our own redirection target
        if !self.is_self(server) {
            self.next_server
                .set(crate::peer::Host::new(server, port));
        }
    }

    // ========================================================================
    // Confirmation finalization
    // ========================================================================

    /// Complete the handshake after the server accepted us: acknowledge,
    /// redirect our own clients, then shed the coordinator role.
    ///
    /// The listener teardown waits for the `Switch` broadcast to drain,
    /// bounded by [`FINALIZE_DRAIN`].
    pub(super) fn finalize_confirmation(&self) {
        crate::trace_fn!("NodeState::finalize_confirmation");

        let server = match self.dialer_endpoint() {
            Some((server, _)) => server,
            None => return,
        };

        self.send_control_from_client(&ToServerMsg::Confirm);
        self.broadcast_control(&ToClientMsg::Switch {
            host: server.clone(),
            port: self.advertise_port(),
        });

        self.client_state.set(ClientState::Connected);

        let listener = self.listener.write().take();
        if let Some(listener) = listener {
            listener.flush(FINALIZE_DRAIN);
            listener.stop();
        }
        self.discovery.stop();
        self.confirmed.clear();

        info!("node: now a client of {}", server);
    }

    // ========================================================================
    // Coordinator maintenance
    // ========================================================================

    /// Gossip the registry to every client, unresolved entries omitted.
    pub(super) fn send_peer_list(&self) {
        let records: Vec<PeerRecord> = self
            .peers
            .snapshot()
            .into_iter()
            .filter(|peer| !peer.is_unresolved())
            .map(|peer| PeerRecord {
                name: peer.name().to_owned(),
                port: peer.port(),
                age_ms: peer.age_ms(),
            })
            .collect();

        if !records.is_empty() {
            self.broadcast_control(&ToClientMsg::Peers(records));
        }
    }

    pub(super) fn ping_clients(&self) {
        self.broadcast_control(&ToClientMsg::Ping);
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Human-readable server line: own name with client counts while
    /// coordinating, the coordinator's name while a client, otherwise
    /// `Disconnected`.
    pub(super) fn server_status(&self) -> String {
        if self.server_connected() {
            let confirmed = self.confirmed.len();
            let total = self.client_count();
            let mut status = self.host_name();
            if confirmed != total {
                status.push_str(&format!(" [{}][{}]", confirmed, total));
            } else {
                status.push_str(&format!(" [{}]", total));
            }
            if let Some((upstream, _)) = self.dialer_endpoint() {
                status.push_str(&format!(" [{}]", upstream));
            }
            status
        } else if let Some((server, _)) = self.dialer_endpoint() {
            server
        } else {
            "Disconnected".to_owned()
        }
    }

    /// One line per registry entry: `<name> [<Source>] <age>`.
    pub(super) fn peer_names(&self) -> String {
        let mut out = String::new();
        for peer in self.peers.snapshot() {
            out.push_str(&format!(
                "{} [{}] {}\n",
                peer.name(),
                peer.source().label(),
                peer.age_ms()
            ));
        }
        out
    }
}

// ============================================================================
// Ingress handlers (transport threads)
// ============================================================================

impl ServerEvents for NodeState {
    fn on_ready(&self, id: ConnectionId) {
        debug!("node: client link {} ready ({} total)", id, self.client_count());
    }

    fn on_data(&self, id: ConnectionId, bytes: &[u8]) {
        let mut stream = Stream::new(bytes);
        if stream.is_next_tag(CONTROL_TAG) {
            match ToServerMsg::decode(&mut stream) {
                Ok(msg) => self.handle_to_server(id, msg),
                Err(err) => warn!("node: dropping control frame from {}: {}", id, err),
            }
        } else if stream.is_next_tag(PAYLOAD_TAG) {
            self.payload.on_server_payload(self, id, &mut stream);
        } else {
            warn!("node: unknown message family from connection {}", id);
        }
    }

    fn on_close(&self, id: ConnectionId) {
        self.confirmed.remove(id);
    }
}

impl ClientEvents for NodeState {
    fn on_data(&self, bytes: &[u8]) {
        let mut stream = Stream::new(bytes);
        if stream.is_next_tag(CONTROL_TAG) {
            match ToClientMsg::decode(&mut stream) {
                Ok(msg) => self.handle_to_client(msg),
                Err(err) => warn!("node: dropping control frame from server: {}", err),
            }
        } else if stream.is_next_tag(PAYLOAD_TAG) {
            self.payload.on_client_payload(self, &mut stream);
        } else {
            warn!("node: unknown message family from server");
        }
    }

    fn on_close(&self) {
        // Lost the coordinator; the next discover() tick falls back to
        // self-host bootstrap.
        info!("node: coordinator link closed");
    }
}

impl PayloadLink for NodeState {
    fn send_to_client(&self, id: ConnectionId, body: Chunk) -> bool {
        let frame = Self::frame(PAYLOAD_TAG, body);
        let listener = self.listener.read();
        match &*listener {
            Some(listener) => listener.send_to(id, frame.as_bytes()),
            None => false,
        }
    }

    fn send_from_server(&self, body: Chunk) -> bool {
        let frame = Self::frame(PAYLOAD_TAG, body);
        let listener = self.listener.read();
        match &*listener {
            Some(listener) => {
                listener.broadcast(frame.as_bytes());
                true
            }
            None => false,
        }
    }

    fn send_from_client(&self, body: Chunk) -> bool {
        let frame = Self::frame(PAYLOAD_TAG, body);
        let dialer = self.dialer.read();
        match &*dialer {
            Some(dialer) => dialer.send(frame.as_bytes()),
            None => false,
        }
    }

    fn client_connected(&self) -> bool {
        self.dialer_connected() && self.client_state.get() == ClientState::Connected
    }
}
