//! LAN discovery
//!
//! Two blocking workers on their own OS threads:
//! - the advertiser answers UDP probes with this node's base URL
//! - the discoverer probes a port range, liveness-checks every candidate and
//!   publishes the survivors in a shared [`PeerDirectory`]
//!
//! Both stop cooperatively when [`DiscoveryService::stop`] clears the shared
//! running flag; latency is bounded by their socket timeouts.

mod advertiser;
mod discoverer;
mod peers;

pub use advertiser::Advertiser;
pub use discoverer::{refresh, scan, Discoverer, HttpLiveness, LivenessProbe};
pub use peers::{Peer, PeerDirectory};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::DiscoverySettings;
use crate::error::{Error, Result};

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Sleep for `duration` in short slices; `false` if `running` was cleared
pub(crate) fn sleep_while_running(running: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

/// What the advertiser answers and where it listens
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub udp_port: u16,
    /// `http://<local-ip>:<http-port>`
    pub base_url: String,
}

/// Handle on the running discovery threads
pub struct DiscoveryService {
    running: Arc<AtomicBool>,
    directory: Arc<PeerDirectory>,
    handles: Vec<JoinHandle<()>>,
}

impl DiscoveryService {
    /// Start the discoverer, plus the advertiser when `advertise` is set
    ///
    /// The advertiser socket is bound before returning so bind failures
    /// surface here.
    pub fn start(settings: DiscoverySettings, advertise: Option<Advertisement>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let directory = Arc::new(PeerDirectory::new());
        let mut handles = Vec::new();

        if let Some(ad) = advertise {
            let advertiser = Advertiser::bind(ad.udp_port, ad.base_url.clone(), settings.advertise_timeout())?;
            info!(udp_port = ad.udp_port, base_url = %ad.base_url, "Advertising on the LAN");
            let flag = running.clone();
            let handle = thread::Builder::new()
                .name("tellar-advertiser".to_string())
                .spawn(move || advertiser.run(&flag))
                .map_err(|e| Error::Discovery(format!("failed to spawn advertiser: {}", e)))?;
            handles.push(handle);
        }

        let flag = running.clone();
        let shared = directory.clone();
        let spawned = thread::Builder::new()
            .name("tellar-discoverer".to_string())
            .spawn(move || discoverer::run_with_http_probe(settings, shared, &flag));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                return Err(Error::Discovery(format!("failed to spawn discoverer: {}", e)));
            }
        }

        Ok(Self {
            running,
            directory,
            handles,
        })
    }

    /// Shared view of the live peers
    pub fn directory(&self) -> Arc<PeerDirectory> {
        self.directory.clone()
    }

    /// Signal both workers and wait for them to exit
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("Discovery thread panicked");
            }
        }
        info!("Discovery stopped");
    }
}
