// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket listener: accepts inbound links and serves each on its own
//! thread.

use super::{serve_socket, ConnectionId, WriteCmd};
use crate::config::{ACCEPT_POLL, HANDSHAKE_TIMEOUT, READ_TIMEOUT, WS_PATH};
use crate::error::{Error, Result};
use crate::{debug, info, warn};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tungstenite::handshake::HandshakeError;
use tungstenite::WebSocket;

/// Inbound-link event handlers.
///
/// Invoked from transport-owned threads; implementations must be
/// thread-safe and must not call back into [`WsListener::stop`].
pub trait ServerEvents: Send + Sync {
    fn on_connect(&self, _id: ConnectionId) {}
    fn on_ready(&self, _id: ConnectionId) {}
    fn on_data(&self, id: ConnectionId, bytes: &[u8]);
    fn on_close(&self, _id: ConnectionId) {}
}

struct ConnEntry {
    tx: Sender<WriteCmd>,
    thread: Option<JoinHandle<()>>,
}

struct ListenerCore {
    connections: Mutex<HashMap<ConnectionId, ConnEntry>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
    handler: Arc<dyn ServerEvents>,
}

/// WebSocket listener accepting framed duplex links on `/ws`.
pub struct WsListener {
    core: Arc<ListenerCore>,
    accept_thread: Option<JoinHandle<()>>,
    port: u16,
    stopped: bool,
}

impl WsListener {
    /// Bind `port` (0 picks an ephemeral port) and start accepting.
    pub fn start(port: u16, handler: Arc<dyn ServerEvents>) -> Result<Self> {
        crate::trace_fn!("WsListener::start");

        let socket = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| Error::Bind(format!("port {}: {}", port, e)))?;
        let local_port = socket.local_addr().map_err(Error::Io)?.port();
        socket.set_nonblocking(true).map_err(Error::Io)?;

        let core = Arc::new(ListenerCore {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
            handler,
        });

        let accept_core = Arc::clone(&core);
        let accept_thread = thread::spawn(move || accept_loop(socket, accept_core));

        info!("listener: serving {} on port {}", WS_PATH, local_port);

        Ok(Self {
            core,
            accept_thread: Some(accept_thread),
            port: local_port,
            stopped: false,
        })
    }

    /// The bound port (useful when started with port 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of inbound links (including those still handshaking).
    pub fn client_count(&self) -> usize {
        self.core.connections.lock().len()
    }

    /// Queue a frame for one link. Returns false if the link is gone.
    pub fn send_to(&self, id: ConnectionId, bytes: &[u8]) -> bool {
        let connections = self.core.connections.lock();
        match connections.get(&id) {
            Some(entry) => entry.tx.send(WriteCmd::Frame(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Queue a frame for every link.
    pub fn broadcast(&self, bytes: &[u8]) {
        let connections = self.core.connections.lock();
        for entry in connections.values() {
            let _ = entry.tx.send(WriteCmd::Frame(bytes.to_vec()));
        }
    }

    /// Wait until every outbound queue drained, bounded by `timeout`.
    ///
    /// A frame popped from its queue is written synchronously before the
    /// owning thread reads again, so one extra read-timeout of grace after
    /// the queues empty covers frames in flight.
    pub fn flush(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let drained = {
                let connections = self.core.connections.lock();
                connections.values().all(|entry| entry.tx.is_empty())
            };
            if drained {
                thread::sleep(READ_TIMEOUT.min(deadline.saturating_duration_since(Instant::now())));
                return;
            }
            if Instant::now() >= deadline {
                warn!("listener: flush timed out with frames still queued");
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Stop accepting, close every link and join all threads. After this
    /// returns no handler is invoked again.
    pub fn stop(mut self) {
        self.stop_impl();
    }

    fn stop_impl(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.core.shutdown.store(true, Ordering::Release);

        self.close_connections();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        // A connection accepted while we were shutting down may have been
        // inserted after the first sweep; the accept thread is joined now,
        // so a second sweep is exhaustive.
        self.close_connections();

        info!("listener: stopped");
    }

    fn close_connections(&self) {
        let entries: Vec<ConnEntry> = {
            let mut connections = self.core.connections.lock();
            connections.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            let _ = entry.tx.send(WriteCmd::Shutdown);
        }
        for mut entry in entries {
            if let Some(handle) = entry.thread.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WsListener {
    fn drop(&mut self) {
        self.stop_impl();
    }
}

fn accept_loop(socket: TcpListener, core: Arc<ListenerCore>) {
    loop {
        if core.shutdown.load(Ordering::Acquire) {
            break;
        }
        match socket.accept() {
            Ok((stream, addr)) => {
                let id = core.next_id.fetch_add(1, Ordering::Relaxed);
                debug!("listener: connection {} from {}", id, addr);
                core.handler.on_connect(id);

                let (tx, rx) = unbounded();
                let conn_core = Arc::clone(&core);
                let handle = thread::spawn(move || connection_loop(id, stream, rx, conn_core));
                core.connections.lock().insert(
                    id,
                    ConnEntry {
                        tx,
                        thread: Some(handle),
                    },
                );
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                warn!("listener: accept failed: {}", err);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn connection_loop(
    id: ConnectionId,
    stream: TcpStream,
    rx: Receiver<WriteCmd>,
    core: Arc<ListenerCore>,
) {
    // The accepting socket is non-blocking; this stream must not be.
    let configured = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_nodelay(true))
        .and_then(|_| stream.set_read_timeout(Some(READ_TIMEOUT)));

    let ws = match configured {
        Ok(()) => accept_handshake(stream, &core.shutdown),
        Err(err) => {
            debug!("listener: socket setup for {} failed: {}", id, err);
            None
        }
    };

    match ws {
        Some(mut ws) => {
            core.handler.on_ready(id);
            serve_socket(&mut ws, &rx, &core.shutdown, |bytes| {
                core.handler.on_data(id, bytes)
            });
        }
        None => debug!("listener: connection {} never became ready", id),
    }

    core.connections.lock().remove(&id);
    core.handler.on_close(id);
    debug!("listener: connection {} closed", id);
}

fn accept_handshake(stream: TcpStream, shutdown: &AtomicBool) -> Option<WebSocket<TcpStream>> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut pending = match tungstenite::accept(stream) {
        Ok(ws) => return Some(ws),
        Err(HandshakeError::Interrupted(mid)) => mid,
        Err(HandshakeError::Failure(err)) => {
            debug!("listener: handshake failed: {}", err);
            return None;
        }
    };

    // The socket read timeout bounds each retry.
    loop {
        if shutdown.load(Ordering::Acquire) || Instant::now() >= deadline {
            return None;
        }
        match pending.handshake() {
            Ok(ws) => return Some(ws),
            Err(HandshakeError::Interrupted(mid)) => pending = mid,
            Err(HandshakeError::Failure(err)) => {
                debug!("listener: handshake failed: {}", err);
                return None;
            }
        }
    }
}
