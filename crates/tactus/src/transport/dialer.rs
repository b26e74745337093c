// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket dialer: the single outbound link of a node.

use super::{serve_socket, WriteCmd};
use crate::config::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, READ_TIMEOUT, WS_PATH};
use crate::error::{Error, Result};
use crate::{debug, info};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::HandshakeError;
use tungstenite::WebSocket;

/// Outbound-link event handlers.
///
/// `on_close` fires when the remote end drops the link, not on an explicit
/// [`WsDialer::disconnect`]. Invoked from the dialer's own thread.
pub trait ClientEvents: Send + Sync {
    fn on_data(&self, bytes: &[u8]);
    fn on_close(&self) {}
}

struct DialerCore {
    connected: AtomicBool,
    shutdown: AtomicBool,
    handler: Arc<dyn ClientEvents>,
}

/// One outbound WebSocket link with its own service thread.
pub struct WsDialer {
    core: Arc<DialerCore>,
    tx: Sender<WriteCmd>,
    thread: Option<JoinHandle<()>>,
    server: String,
    port: u16,
    stopped: bool,
}

impl WsDialer {
    /// Resolve `host`, dial it and complete the WebSocket handshake.
    pub fn connect(host: &str, port: u16, handler: Arc<dyn ClientEvents>) -> Result<Self> {
        crate::trace_fn!("WsDialer::connect");

        // A trailing dot is legal in DNS-SD host names but not in URLs.
        let authority = host.trim_end_matches('.');

        let addrs = (authority, port)
            .to_socket_addrs()
            .map_err(|e| Error::Connect(format!("{}:{}: {}", authority, port, e)))?;

        let mut stream = None;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
        let stream = stream.ok_or_else(|| {
            let reason = last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_owned());
            Error::Connect(format!("{}:{}: {}", authority, port, reason))
        })?;

        stream.set_nodelay(true).map_err(Error::Io)?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(Error::Io)?;

        let url = format!("ws://{}:{}{}", authority, port, WS_PATH);
        let ws = client_handshake(&url, stream)?;

        let core = Arc::new(DialerCore {
            connected: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            handler,
        });
        let (tx, rx) = unbounded();
        let thread_core = Arc::clone(&core);
        let thread = thread::spawn(move || dialer_loop(ws, rx, thread_core));

        info!("client: connected to {}:{}", authority, port);

        Ok(Self {
            core,
            tx,
            thread: Some(thread),
            server: host.to_owned(),
            port,
            stopped: false,
        })
    }

    /// Queue a frame for the server. Returns false once the link is down.
    pub fn send(&self, bytes: &[u8]) -> bool {
        if !self.connected() {
            return false;
        }
        self.tx.send(WriteCmd::Frame(bytes.to_vec())).is_ok()
    }

    pub fn connected(&self) -> bool {
        self.core.connected.load(Ordering::Acquire)
    }

    /// The host name this dialer was pointed at.
    pub fn server_name(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the link and join the service thread. After this returns no
    /// handler is invoked again.
    pub fn disconnect(mut self) {
        self.stop_impl();
    }

    fn stop_impl(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.core.shutdown.store(true, Ordering::Release);
        let _ = self.tx.send(WriteCmd::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.core.connected.store(false, Ordering::Release);
        debug!("client: disconnected from {}", self.server);
    }
}

impl Drop for WsDialer {
    fn drop(&mut self) {
        self.stop_impl();
    }
}

fn dialer_loop(mut ws: WebSocket<TcpStream>, rx: Receiver<WriteCmd>, core: Arc<DialerCore>) {
    serve_socket(&mut ws, &rx, &core.shutdown, |bytes| {
        core.handler.on_data(bytes)
    });
    core.connected.store(false, Ordering::Release);

    // Remote-initiated teardown only; explicit disconnects stay silent.
    if !core.shutdown.load(Ordering::Acquire) {
        core.handler.on_close();
    }
}

fn client_handshake(url: &str, stream: TcpStream) -> Result<WebSocket<TcpStream>> {
    let request = url
        .into_client_request()
        .map_err(|e| Error::Handshake(format!("{}: {}", url, e)))?;

    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut pending = match tungstenite::client::client(request, stream) {
        Ok((ws, _response)) => return Ok(ws),
        Err(HandshakeError::Interrupted(mid)) => mid,
        Err(HandshakeError::Failure(err)) => return Err(Error::Handshake(err.to_string())),
    };

    // The socket read timeout bounds each retry.
    loop {
        if Instant::now() >= deadline {
            return Err(Error::Handshake(format!("{}: timed out", url)));
        }
        match pending.handshake() {
            Ok((ws, _response)) => return Ok(ws),
            Err(HandshakeError::Interrupted(mid)) => pending = mid,
            Err(HandshakeError::Failure(err)) => return Err(Error::Handshake(err.to_string())),
        }
    }
}
