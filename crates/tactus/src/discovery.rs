// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS-SD adapter: advertise this node and cache sightings of its peers.
//!
//! Wraps an `mdns-sd` daemon. The node is registered as
//! `<conformed-host>._<regname>._tcp.local.` and a browse of the same
//! service type feeds an internal cache that `list_peers()` snapshots.
//! Entries appear as soon as a name is *found*; the `host` field stays
//! empty until the daemon resolves it.

use crate::error::{Error, Result};
use crate::{debug, info, warn};
use crossbeam::channel::{unbounded, Receiver, Sender};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One record from the discovery cache. An empty `host` means the name
/// was seen but not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub name: String,
    pub host: String,
    pub port: u16,
}

enum BrowseCmd {
    /// Re-issue the browse request, nudging unresolved names.
    Refresh,
}

struct Running {
    daemon: ServiceDaemon,
    fullname: String,
    service_type: String,
    shutdown: Arc<AtomicBool>,
    ctrl_tx: Sender<BrowseCmd>,
    thread: Option<JoinHandle<()>>,
}

/// Advertises one service and enumerates peers of the same type.
///
/// All operations are safe under concurrent invocation; the daemon handle
/// is internally synchronized and the cache sits behind a mutex.
pub struct Discovery {
    reg_name: String,
    port: u16,
    host_name: String,
    instance: String,
    cache: Arc<Mutex<HashMap<String, Discovered>>>,
    running: Mutex<Option<Running>>,
}

impl Discovery {
    /// Create an adapter advertising `_<reg_name>._tcp.` on `port`.
    ///
    /// `host_name` overrides the local hostname (useful when several nodes
    /// share one machine); pass `None` to use the OS hostname.
    pub fn new(reg_name: &str, port: u16, host_name: Option<String>) -> Result<Self> {
        if reg_name.is_empty() {
            return Err(Error::Config("registration name must not be empty".into()));
        }
        let host_name = match host_name {
            Some(name) => name,
            None => hostname::get()
                .map_err(|e| Error::Config(format!("host name lookup failed: {}", e)))?
                .to_string_lossy()
                .into_owned(),
        };
        if host_name.is_empty() {
            return Err(Error::Config("host name must not be empty".into()));
        }

        let instance = conform_name(&host_name);

        Ok(Self {
            reg_name: reg_name.to_owned(),
            port,
            host_name,
            instance,
            cache: Arc::new(Mutex::new(HashMap::new())),
            running: Mutex::new(None),
        })
    }

    /// Begin advertising and browsing. Idempotent while running.
    pub fn start(&self) -> Result<()> {
        crate::trace_fn!("Discovery::start");

        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;

        let service_type = format!("_{}._tcp.local.", self.reg_name);
        let host = format!("{}.local.", self.instance);
        let service = ServiceInfo::new(
            &service_type,
            &self.instance,
            &host,
            "",
            self.port,
            None::<HashMap<String, String>>,
        )
        .map_err(|e| Error::Discovery(e.to_string()))?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_owned();

        daemon
            .register(service)
            .map_err(|e| Error::Discovery(e.to_string()))?;
        let events = daemon
            .browse(&service_type)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (ctrl_tx, ctrl_rx) = unbounded();
        let thread = {
            let daemon = daemon.clone();
            let service_type = service_type.clone();
            let cache = Arc::clone(&self.cache);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || browse_loop(daemon, service_type, events, ctrl_rx, cache, shutdown))
        };

        info!(
            "discovery: advertising {} as {} on port {}",
            service_type, self.instance, self.port
        );

        *running = Some(Running {
            daemon,
            fullname,
            service_type,
            shutdown,
            ctrl_tx,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Stop advertising and clear the peer cache. Idempotent.
    pub fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(mut running) = running {
            running.shutdown.store(true, Ordering::Release);
            let _ = running.daemon.unregister(&running.fullname);
            let _ = running.daemon.stop_browse(&running.service_type);
            if let Some(handle) = running.thread.take() {
                let _ = handle.join();
            }
            let _ = running.daemon.shutdown();
            self.cache.lock().clear();
            info!("discovery: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Snapshot of the discovery cache, unordered.
    pub fn list_peers(&self) -> Vec<Discovered> {
        self.cache.lock().values().cloned().collect()
    }

    /// Request asynchronous resolution of a named entry; completion shows
    /// up on a later `list_peers()`.
    pub fn resolve(&self, name: &str) {
        let running = self.running.lock();
        if let Some(running) = &*running {
            debug!("discovery: resolve requested for {}", name);
            let _ = running.ctrl_tx.send(BrowseCmd::Refresh);
        }
    }

    /// This node's hostname as reported by the OS (or the override).
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The advertised instance name (conformed hostname).
    pub fn instance_name(&self) -> &str {
        &self.instance
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.stop();
    }
}

fn browse_loop(
    daemon: ServiceDaemon,
    service_type: String,
    mut events: mdns_sd::Receiver<ServiceEvent>,
    ctrl: Receiver<BrowseCmd>,
    cache: Arc<Mutex<HashMap<String, Discovered>>>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        while let Ok(BrowseCmd::Refresh) = ctrl.try_recv() {
            let _ = daemon.stop_browse(&service_type);
            match daemon.browse(&service_type) {
                Ok(receiver) => events = receiver,
                Err(err) => warn!("discovery: re-browse failed: {}", err),
            }
        }

        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => handle_event(event, &service_type, &cache),
            // Timeout, or a disconnected channel during daemon shutdown;
            // the shutdown flag ends the loop either way.
            Err(_) => {}
        }
    }
}

fn handle_event(
    event: ServiceEvent,
    service_type: &str,
    cache: &Arc<Mutex<HashMap<String, Discovered>>>,
) {
    match event {
        ServiceEvent::ServiceFound(_, fullname) => {
            let name = instance_of(&fullname, service_type);
            debug!("discovery: found {}", name);
            cache
                .lock()
                .entry(name.clone())
                .or_insert_with(|| Discovered {
                    name,
                    host: String::new(),
                    port: 0,
                });
        }
        ServiceEvent::ServiceResolved(info) => {
            let name = instance_of(info.get_fullname(), service_type);
            debug!(
                "discovery: resolved {} -> {}:{}",
                name,
                info.get_hostname(),
                info.get_port()
            );
            cache.lock().insert(
                name.clone(),
                Discovered {
                    name,
                    host: info.get_hostname().to_owned(),
                    port: info.get_port(),
                },
            );
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            let name = instance_of(&fullname, service_type);
            debug!("discovery: removed {}", name);
            cache.lock().remove(&name);
        }
        _ => {}
    }
}

/// Extract the instance label from a DNS-SD full name.
fn instance_of(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_owned()
}

/// Conform a hostname for advertisement: `.` and `_` map to `-`, trailing
/// `-` stripped.
pub fn conform_name(host_name: &str) -> String {
    let mapped: String = host_name
        .chars()
        .map(|c| if c == '.' || c == '_' { '-' } else { c })
        .collect();
    mapped.trim_end_matches('-').to_owned()
}
