//! HTTP / WebSocket server of a character node
//!
//! Routes:
//! - `GET /` identity (`{"name": ...}`)
//! - `GET /ws` conversation channel
//! - `GET /picture`, `GET /description` memoized self portrait and description
//! - `GET /history/:sender` conversation replay
//! - `GET /image/:hash` cached media

mod gateway;
mod handlers;
mod media;
mod sessions;

pub use gateway::handle_turn;
pub use media::{media_hash, HttpFetcher, MediaCache, MediaFetcher};
pub use sessions::{Session, SessionRegistry};

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::{Agent, ForkOptions};
use crate::error::{Error, Result};

pub const PORTRAIT_PROMPT: &str = "Draw the most accurate portrait picture of you based on the information from story_tool. Use a picture style matching the era and universe of your story.";

pub const DESCRIPTION_PROMPT: &str = "Describe yourself in a few words (no full sentence).";

// ─────────────────────────────────────────────────────────────────
// Node State
// ─────────────────────────────────────────────────────────────────

/// Everything the handlers share; one per server
pub struct NodeState {
    name: String,
    agent: Arc<dyn Agent>,
    sessions: SessionRegistry,
    media: MediaCache,
    portrait: OnceCell<String>,
    description: OnceCell<String>,
}

impl NodeState {
    /// `base_url` is where this node is reachable (`http://<ip>:<port>`)
    pub fn new(agent: Arc<dyn Agent>, base_url: impl Into<String>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            name: agent.name().to_string(),
            sessions: SessionRegistry::new(agent.clone()),
            media: MediaCache::new(base_url, fetcher),
            agent,
            portrait: OnceCell::new(),
            description: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn media(&self) -> &MediaCache {
        &self.media
    }

    /// Media hash of the portrait, drawn once by a throwaway fork
    ///
    /// Failures are not memoized.
    pub async fn portrait_hash(&self) -> Result<String> {
        self.portrait
            .get_or_try_init(|| async {
                let answer = self.agent.fork(ForkOptions::default()).answer(PORTRAIT_PROMPT).await?;
                let url = answer
                    .image
                    .ok_or_else(|| Error::agent("portrait answer carried no image"))?;
                info!(%url, "Portrait drawn");
                self.media.store(&url).await
            })
            .await
            .cloned()
    }

    /// Short self description, asked once of a throwaway fork
    ///
    /// Failures are not memoized.
    pub async fn description(&self) -> Result<String> {
        self.description
            .get_or_try_init(|| async {
                let answer = self.agent.fork(ForkOptions::default()).answer(DESCRIPTION_PROMPT).await?;
                info!(description = %answer.text, "Description");
                Ok::<_, Error>(answer.text)
            })
            .await
            .cloned()
    }
}

// ─────────────────────────────────────────────────────────────────
// Router & Server
// ─────────────────────────────────────────────────────────────────

pub fn create_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/", get(handlers::identity))
        .route("/ws", get(gateway::ws_handler))
        .route("/picture", get(handlers::picture))
        .route("/description", get(handlers::description))
        .route("/history/:sender", get(handlers::history))
        .route("/image/:hash", get(handlers::image))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
///
/// The description is requested in the background right away so the first
/// `GET /description` is usually answered from memory.
pub async fn serve<F>(listener: TcpListener, state: Arc<NodeState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let preload = state.clone();
    tokio::spawn(async move {
        if let Err(e) = preload.description().await {
            warn!(error = %e, "Description preload failed");
        }
    });

    info!(addr = ?listener.local_addr().ok(), character = %state.name(), "HTTP server listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
