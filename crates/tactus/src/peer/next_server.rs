// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transient redirection target installed by coordinator-control messages.

use super::Host;
use crate::config::NEXT_SERVER_TIMEOUT;
use parking_lot::Mutex;
use std::time::Instant;

/// The next server this node should connect to, valid for a bounded
/// window after being set. Expiry is passive; reads past the deadline
/// simply yield the empty host.
#[derive(Debug, Default)]
pub struct NextServer {
    slot: Mutex<Option<(Host, Instant)>>,
}

impl NextServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, host: Host) {
        self.set_at(host, Instant::now());
    }

    pub fn get(&self) -> Host {
        self.get_at(Instant::now())
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    fn set_at(&self, host: Host, now: Instant) {
        *self.slot.lock() = Some((host, now));
    }

    fn get_at(&self, now: Instant) -> Host {
        match &*self.slot.lock() {
            Some((host, set_time)) if now.duration_since(*set_time) <= NEXT_SERVER_TIMEOUT => {
                host.clone()
            }
            _ => Host::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_within_window_returns_host() {
        let next = NextServer::new();
        let t0 = Instant::now();
        next.set_at(Host::new("alpha", 8001), t0);

        let host = next.get_at(t0 + Duration::from_secs(4));
        assert_eq!(host.name(), "alpha");
        assert_eq!(host.port(), 8001);
    }

    #[test]
    fn test_get_past_window_is_empty() {
        let next = NextServer::new();
        let t0 = Instant::now();
        next.set_at(Host::new("alpha", 8001), t0);

        let host = next.get_at(t0 + Duration::from_millis(4001));
        assert!(host.is_empty());
    }

    #[test]
    fn test_unset_is_empty() {
        let next = NextServer::new();
        assert!(next.get().is_empty());
    }

    #[test]
    fn test_set_rearms_the_window() {
        let next = NextServer::new();
        let t0 = Instant::now();
        next.set_at(Host::new("alpha", 8001), t0);
        next.set_at(Host::new("bravo", 8002), t0 + Duration::from_secs(3));

        let host = next.get_at(t0 + Duration::from_secs(6));
        assert_eq!(host.name(), "bravo");
    }

    #[test]
    fn test_clear_drops_hint() {
        let next = NextServer::new();
        next.set(Host::new("alpha", 8001));
        next.clear();
        assert!(next.get().is_empty());
    }
}
