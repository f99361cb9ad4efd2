//! Peer directory: the current set of live characters on the LAN
//!
//! Written only by the discoverer thread (whole-set replacement after each
//! scan) and read from anywhere without waiting for a scan to finish.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Peer
// ─────────────────────────────────────────────────────────────────

/// A node reachable at `address` (`http://<ip>:<port>`)
///
/// Identity is the address alone; `name` is only filled in once the node
/// answered a liveness check.
#[derive(Debug, Clone)]
pub struct Peer {
    pub address: String,
    pub name: Option<String>,
}

impl Peer {
    /// A peer that answered its liveness check
    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// `ws://<host:port>/ws` for this peer's address
    pub fn ws_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.address)
            .map_err(|e| Error::malformed(format!("peer address '{}': {}", self.address, e)))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| Error::malformed(format!("peer address '{}'", self.address)))?;
        url.set_path("/ws");
        Ok(url)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

// ─────────────────────────────────────────────────────────────────
// Peer Directory
// ─────────────────────────────────────────────────────────────────

/// Thread-safe snapshot of live peers, keyed by address
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, Peer>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set in one step
    pub fn replace(&self, peers: impl IntoIterator<Item = Peer>) {
        let next: HashMap<String, Peer> = peers.into_iter().map(|p| (p.address.clone(), p)).collect();
        *self.peers.write() = next;
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    /// Addresses of the current set
    pub fn addresses(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// First peer whose name differs from `own_name`
    pub fn first_other_than(&self, own_name: &str) -> Option<Peer> {
        self.peers
            .read()
            .values()
            .find(|p| p.name.as_deref() != Some(own_name))
            .cloned()
    }
}
