// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name-ordered, TTL-pruned registry of known peers.

use super::{name_prefer, Peer};
use parking_lot::Mutex;

/// Shared peer registry.
///
/// Entries are kept in strict ascending name order (byte comparison) with
/// per-name uniqueness. The registry is written by ingress handlers and the
/// periodic `discover()` step concurrently; `snapshot()` clones the list
/// out so no caller iterates under the lock.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<Vec<Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer or refresh an existing entry with the same name.
    ///
    /// A refresh updates port and source and takes the minimum of the two
    /// ages, so a stale record can only rejuvenate a peer.
    pub fn add(&self, peer: Peer) {
        let mut peers = self.peers.lock();

        match peers.iter_mut().find(|p| p.name() == peer.name()) {
            Some(existing) => {
                existing.update_port(peer.port());
                existing.update_source(peer.source());
                existing.refresh_age(peer.age_ms());
            }
            None => {
                let at = peers
                    .iter()
                    .position(|p| !name_prefer(p.name(), peer.name()))
                    .unwrap_or(peers.len());
                peers.insert(at, peer);
            }
        }
    }

    /// Age every peer by `dt_ms`.
    pub fn advance(&self, dt_ms: u32) {
        let mut peers = self.peers.lock();
        for peer in peers.iter_mut() {
            peer.add_age(dt_ms);
        }
    }

    /// Remove every peer whose age reached `max_age_ms`.
    pub fn prune(&self, max_age_ms: u32) {
        let mut peers = self.peers.lock();
        peers.retain(|p| p.age_ms() < max_age_ms);
    }

    /// An independent copy of the current entries, in name order.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerSource;

    fn names(registry: &PeerRegistry) -> Vec<String> {
        registry
            .snapshot()
            .iter()
            .map(|p| p.name().to_owned())
            .collect()
    }

    #[test]
    fn test_add_keeps_ascending_name_order() {
        let registry = PeerRegistry::new();
        for name in ["mike", "alpha", "zulu", "echo", "bravo"] {
            registry.add(Peer::new(name, 8001, PeerSource::Discovered));
        }

        assert_eq!(names(&registry), ["alpha", "bravo", "echo", "mike", "zulu"]);
    }

    #[test]
    fn test_add_no_duplicate_names() {
        let registry = PeerRegistry::new();
        registry.add(Peer::new("alpha", 8001, PeerSource::Discovered));
        registry.add(Peer::new("alpha", 9000, PeerSource::Client));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].port(), 9000); // TEST: Port rewritten
        assert_eq!(snapshot[0].source(), PeerSource::Client); // TEST: Source updated
    }

    #[test]
    fn test_add_refresh_takes_minimum_age() {
        let registry = PeerRegistry::new();
        registry.add(Peer::with_age("alpha", 8001, PeerSource::Remote, 3000));
        registry.add(Peer::with_age("alpha", 8001, PeerSource::Remote, 7000));
        assert_eq!(registry.snapshot()[0].age_ms(), 3000);

        registry.add(Peer::new("alpha", 8001, PeerSource::Server));
        assert_eq!(registry.snapshot()[0].age_ms(), 0);
    }

    #[test]
    fn test_advance_then_prune_exact_boundary() {
        let registry = PeerRegistry::new();
        registry.add(Peer::with_age("alpha", 8001, PeerSource::Discovered, 0));
        registry.add(Peer::with_age("bravo", 8001, PeerSource::Discovered, 1000));

        registry.advance(3000);
        registry.advance(4000);
        // alpha: 7000, bravo: 8000
        registry.prune(8000);

        assert_eq!(names(&registry), ["alpha"]); // TEST: age >= max is removed
    }

    #[test]
    fn test_prune_removes_everything_past_threshold() {
        let registry = PeerRegistry::new();
        for (name, age) in [("a", 100), ("b", 200), ("c", 300)] {
            registry.add(Peer::with_age(name, 1, PeerSource::Remote, age));
        }
        registry.prune(200);
        assert_eq!(names(&registry), ["a"]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let registry = PeerRegistry::new();
        registry.add(Peer::new("alpha", 8001, PeerSource::Discovered));

        let snapshot = registry.snapshot();
        registry.add(Peer::new("bravo", 8001, PeerSource::Discovered));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_interleaved_adds_hold_ordering_invariant() {
        let registry = PeerRegistry::new();
        let mut expected = Vec::new();
        for i in [9, 3, 7, 1, 5, 0, 8, 2, 6, 4] {
            let name = format!("peer-{}", i);
            registry.add(Peer::new(name.clone(), 8001, PeerSource::Discovered));
            expected.push(name);
        }
        expected.sort();

        assert_eq!(names(&registry), expected);
    }
}
