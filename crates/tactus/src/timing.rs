// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timing primitives: monotonic interval timer, periodic gate and the
//! logical timestamp scalar used by the clock synchronizer.

use crate::ser::{Chunk, PutChunk};
use std::ops::{Add, Sub};
use std::time::Instant;

/// A timer reporting the interval since the last `start()` using the
/// monotonic clock (immune to wall-clock adjustment).
#[derive(Debug, Clone, Copy)]
pub struct MonoTimer {
    start: Instant,
}

impl MonoTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn start(&mut self) {
        self.start = Instant::now();
    }

    /// Seconds elapsed since the last `start()`.
    pub fn interval(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for MonoTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// A polling helper that fires at a fixed period.
///
/// `poll()` returns `true` iff the period has elapsed since the last
/// `true`, updating the internal stamp when it does. The first call after
/// construction fires immediately.
#[derive(Debug)]
pub struct IntervalGate {
    timer: MonoTimer,
    period: f64,
    last_fire: f64,
}

impl IntervalGate {
    pub fn new(period_ms: f64) -> Self {
        let timer = MonoTimer::new();
        let period = period_ms / 1000.0;
        let last_fire = timer.interval() - period;
        Self {
            timer,
            period,
            last_fire,
        }
    }

    /// Returns `true` iff the period has elapsed since the last `true`.
    pub fn poll(&mut self) -> bool {
        let time = self.timer.interval();
        if time >= self.last_fire + self.period {
            self.last_fire = time;
            return true;
        }
        false
    }

    /// Milliseconds until the next `poll()` would fire (zero if due now).
    pub fn until_next_ms(&self) -> f64 {
        let time = self.timer.interval();
        ((self.last_fire + self.period - time) * 1000.0).max(0.0)
    }

    /// Restart the gate; the next `poll()` fires immediately.
    pub fn reset(&mut self) {
        self.timer.start();
        self.last_fire = self.timer.interval() - self.period;
    }
}

/// A real-valued logical time in seconds.
///
/// Not tied to the wall clock; this is the monotonic scalar exchanged by
/// the sync protocol and serialized as its underlying `f64` bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct TimeStamp(f64);

impl TimeStamp {
    pub fn new(secs: f64) -> Self {
        Self(secs)
    }

    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Convert a sample count at the given rate into a timestamp.
    pub fn from_count(count: u64, sampling_rate: f64) -> Self {
        Self(count as f64 / sampling_rate)
    }

    /// Half the timestamp; used by the two-way offset estimator.
    pub fn half(self) -> Self {
        Self(self.0 * 0.5)
    }

    /// The timestamp rounded to a sample count at the given rate.
    pub fn as_samples(self, sampling_rate: f64) -> i64 {
        (self.0 * sampling_rate).round() as i64
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }
}

impl Add for TimeStamp {
    type Output = TimeStamp;

    fn add(self, rhs: TimeStamp) -> TimeStamp {
        TimeStamp(self.0 + rhs.0)
    }
}

impl Sub for TimeStamp {
    type Output = TimeStamp;

    fn sub(self, rhs: TimeStamp) -> TimeStamp {
        TimeStamp(self.0 - rhs.0)
    }
}

impl From<f64> for TimeStamp {
    fn from(secs: f64) -> Self {
        Self(secs)
    }
}

impl PutChunk for TimeStamp {
    fn put_into(&self, chunk: &mut Chunk) {
        chunk.put_f64(self.0);
    }
}
