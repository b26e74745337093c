// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run one tactus peer from the command line.
//!
//! Starts a node, drives the discover/sync loop and prints the group
//! status once a second. Start it on two machines of the same LAN and
//! watch them elect a coordinator and converge their clocks.

use clap::Parser;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tactus::config::{DEFAULT_MAX_PEER_AGE_MS, DEFAULT_PORT, DEFAULT_SAMPLING_RATE, DEFAULT_TICK_MS};
use tactus::logging::{init_logger, ConsoleOutput, LogLevel};
use tactus::node::PeerNode;
use tactus::sync::ClockSync;
use tactus::timing::{IntervalGate, MonoTimer};
use tactus::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "tactus-node", about = "Run a tactus peer on this machine")]
struct Args {
    /// Service registration name (groups nodes into one peer set)
    #[arg(long, default_value = "tactus")]
    name: String,

    /// Listener / advertisement port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Discover cadence in milliseconds
    #[arg(long = "tick-ms", default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u32,

    /// Registry age past which peers are pruned, in milliseconds
    #[arg(long = "max-peer-age-ms", default_value_t = DEFAULT_MAX_PEER_AGE_MS)]
    max_peer_age_ms: u32,

    /// Clock probe cadence in milliseconds
    #[arg(long = "sync-ms", default_value_t = 100)]
    sync_ms: u32,

    /// Logical sampling rate of the synchronized clock
    #[arg(long, default_value_t = DEFAULT_SAMPLING_RATE)]
    rate: f64,

    /// Seed peers for networks without multicast ("host:port")
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Turn off DNS-SD (use --peer seeds only)
    #[arg(long = "no-discovery")]
    no_discovery: bool,

    /// Show debug output
    #[arg(long, short)]
    verbose: bool,
}

fn parse_seed(seed: &str) -> Result<(String, u16), String> {
    match seed.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
            Ok(port) => Ok((host.to_owned(), port)),
            Err(_) => Err(format!("bad port in seed peer {:?}", seed)),
        },
        _ => Err(format!("seed peer {:?} is not host:port", seed)),
    }
}

fn main() -> tactus::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    init_logger(Arc::new(ConsoleOutput::new(level)), level);

    let clock = Arc::new(ClockSync::with_sampling_rate(args.rate));
    let node = PeerNode::builder(&args.name)
        .port(args.port)
        .discovery(!args.no_discovery)
        .payload(clock.clone())
        .build()?;

    for seed in &args.peers {
        match parse_seed(seed) {
            Ok((host, port)) => node.add_peer(&host, port),
            Err(reason) => {
                return Err(tactus::Error::Config(reason));
            }
        }
    }

    info!(
        "tactus-node: {} advertising _{}._tcp. on port {}",
        node.host_name(),
        args.name,
        args.port
    );

    let mut discover_gate = IntervalGate::new(f64::from(args.tick_ms));
    let mut sync_gate = IntervalGate::new(f64::from(args.sync_ms));
    let mut status_gate = IntervalGate::new(1000.0);
    let mut progress_timer = MonoTimer::new();

    loop {
        // Advance the logical clock by the wall time elapsed
        let elapsed = progress_timer.interval();
        progress_timer.start();
        clock.progress((elapsed * args.rate) as u64);

        if discover_gate.poll() {
            node.discover(args.tick_ms, args.max_peer_age_ms);
        }
        if sync_gate.poll() {
            clock.sync(&node);
        }
        if status_gate.poll() {
            info!(
                "status: {} | clock {:.3} s (offset {:+.3} ms)",
                node.server_name(),
                clock.as_time().as_secs_f64(),
                clock.offset().as_secs_f64() * 1000.0
            );
            debug!("peers:\n{}", node.peer_names());
        }

        thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed() {
        assert_eq!(
            parse_seed("studio.local:8001"),
            Ok(("studio.local".to_owned(), 8001))
        );
        assert!(parse_seed("8001").is_err());
        assert!(parse_seed("studio:notaport").is_err());
        assert!(parse_seed(":8001").is_err());
    }
}
