//! Read-only HTTP endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use super::NodeState;
use crate::error::{Error, Result};
use crate::protocol::{Info, Message};

const JPEG: [(header::HeaderName, &str); 1] = [(header::CONTENT_TYPE, "image/jpeg")];

/// `GET /` identity document, also the liveness check target
pub async fn identity(State(state): State<Arc<NodeState>>) -> Json<Info> {
    Json(Info {
        name: state.name().to_string(),
    })
}

/// `GET /picture` memoized portrait
pub async fn picture(State(state): State<Arc<NodeState>>) -> Result<impl IntoResponse> {
    let hash = state.portrait_hash().await?;
    let bytes = state
        .media()
        .get(&hash)
        .ok_or_else(|| Error::Internal(format!("portrait {} missing from cache", hash)))?;
    Ok((JPEG, bytes))
}

/// `GET /description` memoized self description
pub async fn description(State(state): State<Arc<NodeState>>) -> Result<String> {
    state.description().await
}

/// `GET /history/:sender` conversation replay, `[]` for unknown senders
pub async fn history(State(state): State<Arc<NodeState>>, Path(sender): Path<String>) -> Json<Vec<Message>> {
    Json(state.sessions().history(&sender))
}

/// `GET /image/:hash` cached media
pub async fn image(State(state): State<Arc<NodeState>>, Path(hash): Path<String>) -> Result<impl IntoResponse> {
    let bytes = state
        .media()
        .get(&hash)
        .ok_or_else(|| Error::NotFound(format!("image {}", hash)))?;
    Ok((JPEG, bytes))
}
