// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Election bookkeeping: client-link state, the confirmed-client set and
//! the decision rule itself.

use crate::peer::name_prefer;
use crate::transport::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};

/// State of this node's outbound (client) link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    /// Dialed, negotiation outcome pending.
    Unconfirmed = 0,
    /// Server accepted us; finalization runs on the next tick.
    Confirmed = 1,
    /// Server rejected us; the next tick disconnects.
    Failed = 2,
    /// Fully a client of the coordinator.
    Connected = 3,
}

/// Atomic cell for [`ClientState`]. Written only by the coordinator state
/// machine (driver thread or the unique dialer ingress thread); readers
/// see whole transitions.
pub(crate) struct ClientStateCell(AtomicU8);

impl ClientStateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ClientState::Unconfirmed as u8))
    }

    pub(crate) fn get(&self) -> ClientState {
        match self.0.load(Ordering::Acquire) {
            0 => ClientState::Unconfirmed,
            1 => ClientState::Confirmed,
            2 => ClientState::Failed,
            _ => ClientState::Connected,
        }
    }

    pub(crate) fn set(&self, state: ClientState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Inbound connections that acknowledged the election handshake.
#[derive(Default)]
pub(crate) struct ConfirmedClients {
    ids: Mutex<HashSet<ConnectionId>>,
}

impl ConfirmedClients {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, id: ConnectionId) {
        self.ids.lock().insert(id);
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        self.ids.lock().remove(&id);
    }

    pub(crate) fn clear(&self) {
        self.ids.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.lock().len()
    }
}

/// The election rule, server side.
///
/// A negotiating peer is confirmed as our client when its group is
/// smaller than ours, or the groups tie and our name sorts first.
/// `false` means the peer should be the coordinator instead; the caller
/// then installs it as our next server.
pub(crate) fn should_confirm(
    local_clients: i32,
    remote_clients: i32,
    local_name: &str,
    remote_name: &str,
) -> bool {
    let prefer_local = remote_clients == local_clients && name_prefer(local_name, remote_name);
    remote_clients < local_clients || prefer_local
}

/// Canonical form used for self-connection guarding: lowercase, trailing
/// dot trimmed, a trailing `.local` label stripped. This makes the mDNS
/// rendering of our own name (`host.local.`) compare equal to the OS
/// hostname (`host`).
pub(crate) fn canonical_host(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    let trimmed = lowered.trim_end_matches('.');
    trimmed.strip_suffix(".local").unwrap_or(trimmed).to_owned()
}
