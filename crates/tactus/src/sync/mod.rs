// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Clock synchronization over the peer group's payload channel.
//!
//! A [`ClockSync`] rides on a node as its payload collaborator. While the
//! node is a confirmed client, periodic `Sync(t1)` probes go to the
//! coordinator, which answers each one statelessly with `Respond(t1, t2)`.
//! The client folds every answer into its [`PrecisionTimer`] offset
//! through damping, a 5-wide median filter and a slew bound, aligning its
//! logical clock to the coordinator's with sub-millisecond stability.
//!
//! Losing a `Respond` merely skips one update. A coordinator change resets
//! nothing: the first samples after reconnect move the offset by at most
//! the per-step bound until the filter re-converges.

mod filter;
mod timer;

pub use filter::MedianWindow;
pub use timer::PrecisionTimer;

use crate::node::{Payload, PayloadLink};
use crate::protocol::ClockMsg;
use crate::ser::Stream;
use crate::timing::TimeStamp;
use crate::transport::ConnectionId;
use crate::{debug, warn};
use parking_lot::Mutex;

/// Thread-safe clock synchronizer.
///
/// Drive it from two places: the host advances the clock with
/// [`progress`](Self::progress) (e.g. per processed audio buffer) and a
/// periodic driver calls [`sync`](Self::sync); everything else happens in
/// the node's ingress handlers.
pub struct ClockSync {
    timer: Mutex<PrecisionTimer>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            timer: Mutex::new(PrecisionTimer::default()),
        }
    }

    pub fn with_sampling_rate(sampling_rate: f64) -> Self {
        Self {
            timer: Mutex::new(PrecisionTimer::new(sampling_rate)),
        }
    }

    /// Send one `Sync` probe if this node is currently a confirmed client.
    pub fn sync(&self, link: &dyn PayloadLink) {
        if !link.client_connected() {
            return;
        }
        let t1 = self.timer.lock().as_time();
        link.send_from_client(ClockMsg::Sync { t1 }.encode());
    }

    /// Advance the logical clock by `count` samples.
    pub fn progress(&self, count: u64) {
        self.timer.lock().progress(count);
    }

    /// Restart the clock at `count`.
    pub fn reset(&self, count: u64) {
        self.timer.lock().reset(count);
    }

    pub fn as_time(&self) -> TimeStamp {
        self.timer.lock().as_time()
    }

    pub fn as_samples(&self) -> i64 {
        self.timer.lock().as_samples()
    }

    pub fn count(&self) -> u64 {
        self.timer.lock().count()
    }

    pub fn offset(&self) -> TimeStamp {
        self.timer.lock().offset()
    }

    /// Seconds since the clock last stepped backwards. Consumers needing
    /// strict monotonicity should hold off while this is small.
    pub fn monotonic_time(&self) -> f64 {
        self.timer.lock().monotonic_time()
    }

    pub fn set_sampling_rate(&self, sampling_rate: f64) {
        self.timer.lock().set_sampling_rate(sampling_rate);
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for ClockSync {
    fn on_server_payload(&self, link: &dyn PayloadLink, id: ConnectionId, stream: &mut Stream<'_>) {
        match ClockMsg::decode(stream) {
            Ok(ClockMsg::Sync { t1 }) => {
                let t2 = self.timer.lock().as_time();
                link.send_to_client(id, ClockMsg::Respond { t1, t2 }.encode());
            }
            Ok(ClockMsg::Respond { .. }) => {
                debug!("sync: ignoring Respond arriving on a server link");
            }
            Err(err) => warn!("sync: dropping malformed probe: {}", err),
        }
    }

    fn on_client_payload(&self, _link: &dyn PayloadLink, stream: &mut Stream<'_>) {
        match ClockMsg::decode(stream) {
            Ok(ClockMsg::Respond { t1, t2 }) => {
                let applied = self.timer.lock().apply_respond(t1, t2);
                debug!(
                    "sync: offset adjusted by {:+.3} ms",
                    applied.as_secs_f64() * 1000.0
                );
            }
            Ok(ClockMsg::Sync { .. }) => {
                debug!("sync: ignoring Sync arriving on the client link");
            }
            Err(err) => warn!("sync: dropping malformed response: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PAYLOAD_TAG;
    use crate::ser::Chunk;
    use parking_lot::Mutex as PlMutex;

    /// Captures sends instead of touching the network.
    #[derive(Default)]
    struct RecordingLink {
        client_connected: bool,
        to_client: PlMutex<Vec<(ConnectionId, Vec<u8>)>>,
        from_client: PlMutex<Vec<Vec<u8>>>,
    }

    impl PayloadLink for RecordingLink {
        fn send_to_client(&self, id: ConnectionId, body: Chunk) -> bool {
            self.to_client.lock().push((id, body.into_bytes()));
            true
        }

        fn send_from_server(&self, _body: Chunk) -> bool {
            true
        }

        fn send_from_client(&self, body: Chunk) -> bool {
            self.from_client.lock().push(body.into_bytes());
            true
        }

        fn client_connected(&self) -> bool {
            self.client_connected
        }
    }

    #[test]
    fn test_sync_only_sends_while_client() {
        let clock = ClockSync::new();
        let link = RecordingLink::default();

        clock.sync(&link);
        assert!(link.from_client.lock().is_empty());

        let link = RecordingLink {
            client_connected: true,
            ..Default::default()
        };
        clock.sync(&link);
        assert_eq!(link.from_client.lock().len(), 1);
    }

    #[test]
    fn test_server_answers_sync_with_respond() {
        let clock = ClockSync::with_sampling_rate(1000.0);
        clock.progress(250);
        let link = RecordingLink::default();

        let probe = ClockMsg::Sync {
            t1: TimeStamp::new(0.1),
        }
        .encode();
        let mut stream = Stream::new(probe.as_bytes());
        clock.on_server_payload(&link, 7, &mut stream);

        let sent = link.to_client.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 7);

        let mut stream = Stream::new(&sent[0].1);
        match ClockMsg::decode(&mut stream).expect("Decode respond") {
            ClockMsg::Respond { t1, t2 } => {
                assert_eq!(t1, TimeStamp::new(0.1));
                assert_eq!(t2, TimeStamp::new(0.25)); // TEST: server's own time
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_client_folds_respond_into_offset() {
        let clock = ClockSync::with_sampling_rate(1000.0);
        let link = RecordingLink::default();

        // Enough consistent samples to open the slew bound
        for _ in 0..6 {
            clock.progress(100);
            let t1 = clock.as_time();
            let base = clock.count() as f64 / 1000.0;
            let answer = ClockMsg::Respond {
                t1,
                t2: TimeStamp::new(base + 0.5),
            }
            .encode();
            let mut stream = Stream::new(answer.as_bytes());
            clock.on_client_payload(&link, &mut stream);
        }

        assert!(clock.offset().as_secs_f64() > 0.0);
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let clock = ClockSync::new();
        let link = RecordingLink::default();

        let mut garbage = Chunk::new();
        garbage.put_str("Sideways");
        let mut stream = Stream::new(garbage.as_bytes());
        clock.on_server_payload(&link, 1, &mut stream);
        assert!(link.to_client.lock().is_empty());

        let offset_before = clock.offset();
        let mut stream = Stream::new(&[1, 2, 3]);
        clock.on_client_payload(&link, &mut stream);
        assert_eq!(clock.offset(), offset_before);
    }

    #[test]
    fn test_payload_tag_constant_matches_wire() {
        // The node prefixes payload frames with this tag before they reach
        // the handlers above.
        assert_eq!(PAYLOAD_TAG, "-");
    }
}
