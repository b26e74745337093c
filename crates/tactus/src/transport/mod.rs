// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket transport surface: connection-oriented framed duplex links.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                         WsListener                           |
//! |  +----------------+   +-----------------------------------+  |
//! |  |  accept thread |   |  connections                      |  |
//! |  |  (non-blocking |   |  HashMap<ConnectionId, ConnEntry> |  |
//! |  |   poll loop)   |   |  (outbound queue + join handle)   |  |
//! |  +----------------+   +-----------------------------------+  |
//! +--------------------------------------------------------------+
//!                              |
//!            one thread per connection, owning its socket:
//!            read (20 ms timeout) / drain outbound queue
//!                              |
//! +--------------------------------------------------------------+
//! |                          WsDialer                            |
//! |   single connection thread, same read/write multiplexing     |
//! +--------------------------------------------------------------+
//! ```
//!
//! Each connection thread owns its WebSocket exclusively, so per-link frame
//! delivery is serialized by construction. Callers enqueue outbound frames
//! on a channel; the thread alternates between draining that queue and a
//! bounded-timeout read. `stop()`/`disconnect()` are synchronous: they swap
//! state out, signal shutdown and join every thread, so no handler runs
//! after they return.
//!
//! Handlers are invoked from transport-owned threads and may run
//! concurrently with user calls. They must not re-enter `stop()`.

mod dialer;
mod listener;

pub use dialer::{ClientEvents, WsDialer};
pub use listener::{ServerEvents, WsListener};

use crate::debug;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tungstenite::{Message, WebSocket};

/// Stable identifier of one inbound connection, opaque to callers.
pub type ConnectionId = u64;

/// Commands accepted by a connection thread's outbound queue.
pub(crate) enum WriteCmd {
    Frame(Vec<u8>),
    Shutdown,
}

/// I/O errors that mean "try again" rather than "link is dead".
pub(crate) fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn is_transient_ws(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Io(io_err) => is_transient_io(io_err),
        _ => false,
    }
}

/// Multiplex one WebSocket: drain the outbound queue, then perform one
/// bounded read, until shutdown or the link dies. Returns when the link
/// should be torn down; the caller handles close notification.
pub(crate) fn serve_socket<S, F>(
    ws: &mut WebSocket<S>,
    rx: &crossbeam::channel::Receiver<WriteCmd>,
    shutdown: &AtomicBool,
    mut on_data: F,
) where
    S: io::Read + io::Write,
    F: FnMut(&[u8]),
{
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        // Outbound first: write latency is bounded by one read timeout.
        let mut closing = false;
        loop {
            match rx.try_recv() {
                Ok(WriteCmd::Frame(bytes)) => {
                    if let Err(err) = ws.send(Message::Binary(bytes)) {
                        if !is_transient_ws(&err) {
                            debug!("transport: send failed: {}", err);
                            closing = true;
                            break;
                        }
                    }
                }
                Ok(WriteCmd::Shutdown) => {
                    closing = true;
                    break;
                }
                Err(crossbeam::channel::TryRecvError::Empty) => break,
                Err(crossbeam::channel::TryRecvError::Disconnected) => {
                    closing = true;
                    break;
                }
            }
        }
        if closing {
            break;
        }

        match ws.read() {
            Ok(Message::Binary(bytes)) => on_data(&bytes),
            Ok(Message::Close(_)) => break,
            // Text, ping and pong are not part of the protocol; control
            // frames are answered by the library.
            Ok(_) => {}
            Err(tungstenite::Error::Io(err)) if is_transient_io(&err) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                break
            }
            Err(err) => {
                debug!("transport: read failed: {}", err);
                break;
            }
        }
    }

    let _ = ws.close(None);
    let _ = ws.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_io_classification() {
        assert!(is_transient_io(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient_io(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_transient_io(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient_io(&io::Error::from(
            io::ErrorKind::ConnectionReset
        )));
    }

    #[test]
    fn test_transient_ws_only_wraps_io() {
        let err = tungstenite::Error::Io(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(is_transient_ws(&err));
        assert!(!is_transient_ws(&tungstenite::Error::ConnectionClosed));
    }
}
