//! Common test utilities and fixtures
//!
//! Spawns real nodes on loopback with scripted agents and an in-memory media
//! fetcher.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use tellar::agent::{ScriptedAgent, ScriptedConfig};
use tellar::error::{Error, Result};
use tellar::server::{self, MediaFetcher, NodeState};

// ─────────────────────────────────────────────────────────────────
// Media Fetcher
// ─────────────────────────────────────────────────────────────────

/// Serves a fixed table of URL -> bytes and counts fetches
#[derive(Default)]
pub struct StaticFetcher {
    assets: HashMap<String, Bytes>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn with_asset(mut self, url: &str, bytes: &'static [u8]) -> Self {
        self.assets.insert(url.to_string(), Bytes::from_static(bytes));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.assets
            .get(url)
            .cloned()
            .ok_or_else(|| Error::media_fetch(url, "404 Not Found"))
    }
}

// ─────────────────────────────────────────────────────────────────
// Test Node
// ─────────────────────────────────────────────────────────────────

/// A node serving on `127.0.0.1:<random port>`
pub struct TestNode {
    pub addr: SocketAddr,
    pub state: Arc<NodeState>,
    pub agent: Arc<ScriptedAgent>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestNode {
    pub async fn start(agent: ScriptedAgent, fetcher: Arc<StaticFetcher>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let agent = Arc::new(agent);
        let state = Arc::new(NodeState::new(agent.clone(), format!("http://{}", addr), fetcher));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let served = state.clone();
        let task = tokio::spawn(async move {
            server::serve(listener, served, async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            agent,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Scripted echo character
    pub async fn echo(name: &str) -> Self {
        Self::start(ScriptedAgent::new(name, "english"), Arc::new(StaticFetcher::default())).await
    }

    pub async fn with_config(name: &str, config: ScriptedConfig, fetcher: Arc<StaticFetcher>) -> Self {
        Self::start(ScriptedAgent::with_config(name, "english", config), fetcher).await
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Graceful stop; waits for the server task
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Poll `check` every 20ms until it holds or `timeout` elapses
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
