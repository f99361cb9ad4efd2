//! Active side of discovery: probe the LAN, then keep only peers that answer
//! `GET /`

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::peers::{Peer, PeerDirectory};
use super::sleep_while_running;
use crate::config::DiscoverySettings;
use crate::error::Result;
use crate::protocol::{Info, PROBE_PAYLOAD};

// ─────────────────────────────────────────────────────────────────
// Liveness
// ─────────────────────────────────────────────────────────────────

/// Checks whether a candidate address is a live node
pub trait LivenessProbe: Send + Sync {
    /// The node's name, or `None` if it did not answer correctly
    fn check(&self, address: &str) -> Option<String>;
}

/// `GET <address>` expecting `{"name": ...}`
pub struct HttpLiveness {
    client: reqwest::blocking::Client,
}

impl HttpLiveness {
    /// Must be called outside of an async runtime
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl LivenessProbe for HttpLiveness {
    fn check(&self, address: &str) -> Option<String> {
        let response = match self.client.get(address).send().and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(e) => {
                debug!(%address, error = %e, "Liveness check failed");
                return None;
            }
        };

        match response.json::<Info>() {
            Ok(info) => Some(info.name),
            Err(e) => {
                debug!(%address, error = %e, "Liveness check returned an unexpected body");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Scan
// ─────────────────────────────────────────────────────────────────

/// Probe every configured port once and collect the advertised addresses
pub fn scan(settings: &DiscoverySettings, running: &AtomicBool) -> HashSet<String> {
    let mut candidates = HashSet::new();

    for port in settings.probe_ports() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = probe_port(settings, port, &mut candidates) {
            debug!(port, error = %e, "Discovery probe failed");
        }
    }

    candidates
}

fn probe_port(settings: &DiscoverySettings, port: u16, candidates: &mut HashSet<String>) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_broadcast(true)?;
    socket.send_to(PROBE_PAYLOAD, (settings.broadcast_addr.as_str(), port))?;

    let deadline = Instant::now() + settings.probe_timeout();
    let mut buf = [0u8; 1024];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        socket.set_read_timeout(Some(remaining))?;

        match socket.recv_from(&mut buf) {
            Ok((len, sender)) => {
                let address = String::from_utf8_lossy(&buf[..len]).trim().to_string();
                if !address.is_empty() && candidates.insert(address.clone()) {
                    debug!(port, %sender, %address, "Discovery response");
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Liveness-check the union of `candidates` and the current set, then
/// replace the directory with the survivors
pub fn refresh(candidates: HashSet<String>, directory: &PeerDirectory, probe: &dyn LivenessProbe) {
    let mut addresses = candidates;
    addresses.extend(directory.addresses());

    let survivors: Vec<Peer> = addresses
        .into_iter()
        .filter_map(|address| probe.check(&address).map(|name| Peer::named(address, name)))
        .collect();

    let before = directory.len();
    directory.replace(survivors);
    if directory.len() != before {
        info!(peers = directory.len(), "Peer set changed");
    }
}

// ─────────────────────────────────────────────────────────────────
// Discoverer
// ─────────────────────────────────────────────────────────────────

/// Periodic scan + refresh loop
pub struct Discoverer {
    settings: DiscoverySettings,
    directory: Arc<PeerDirectory>,
    probe: Arc<dyn LivenessProbe>,
}

impl Discoverer {
    pub fn new(settings: DiscoverySettings, directory: Arc<PeerDirectory>, probe: Arc<dyn LivenessProbe>) -> Self {
        Self {
            settings,
            directory,
            probe,
        }
    }

    /// One full cycle: scan, merge, check, replace
    pub fn cycle(&self, running: &AtomicBool) {
        let candidates = scan(&self.settings, running);
        debug!(candidates = candidates.len(), "Discovery scan complete");
        if !running.load(Ordering::SeqCst) {
            return;
        }
        refresh(candidates, &self.directory, self.probe.as_ref());
    }

    /// Run cycles until `running` is cleared
    pub fn run(&self, running: &AtomicBool) {
        info!(
            broadcast = %self.settings.broadcast_addr,
            ports = ?self.settings.probe_ports(),
            "Discoverer started"
        );

        if !sleep_while_running(running, self.settings.initial_delay()) {
            return;
        }
        loop {
            self.cycle(running);
            if !sleep_while_running(running, self.settings.scan_interval()) {
                break;
            }
        }

        debug!("Discoverer stopped");
    }
}

/// Build the HTTP probe on the current thread and run the discoverer
pub(super) fn run_with_http_probe(settings: DiscoverySettings, directory: Arc<PeerDirectory>, running: &AtomicBool) {
    let probe = match HttpLiveness::new(settings.liveness_timeout()) {
        Ok(probe) => probe,
        Err(e) => {
            warn!(error = %e, "Could not build the liveness client, discoverer stopped");
            return;
        }
    };
    Discoverer::new(settings, directory, Arc::new(probe)).run(running);
}
