//! Message gateway: the `/ws` duplex channel
//!
//! One frame in, one reply out, strictly in turn. A frame that is not a
//! message closes the socket with 1003; an agent or media failure closes it
//! with 1011. The accepting side never reconnects.

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::NodeState;
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::Message;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<NodeState>>) -> Response {
    ws.on_upgrade(move |socket| connection(socket, state))
}

/// Run one full turn for an inbound frame and return the reply to send
pub async fn handle_turn(state: &NodeState, frame: &str) -> Result<Message> {
    let inbound = Message::decode_inbound(frame)?;
    let session = state.sessions().get_or_create(&inbound.sender);
    let _turn = session.lock_turn().await;

    info!(sender = %inbound.sender, text = %inbound.text, "Message received");
    session.append(inbound.clone());

    let answer = session.agent().answer(&inbound.text).await?;
    let image = state.media().resolve(answer.image.as_deref()).await?;

    let reply = Message::new(state.name(), answer.text).with_image(image);
    info!(sender = %inbound.sender, text = %reply.text, image = ?reply.image, "Reply");
    session.append(reply.clone());

    Ok(reply)
}

fn close_for(error: &Error) -> CloseFrame<'static> {
    let code = match error.code() {
        ErrorCode::ProtocolMalformed => close_code::UNSUPPORTED,
        _ => close_code::ERROR,
    };
    CloseFrame {
        code,
        reason: Cow::Owned(error.code().as_str()),
    }
}

async fn connection(socket: WebSocket, state: Arc<NodeState>) {
    let (mut sender, mut receiver) = socket.split();
    debug!("WebSocket client connected");

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let error = Error::malformed("binary frame is not UTF-8");
                    let _ = sender.send(WsMessage::Close(Some(close_for(&error)))).await;
                    break;
                }
            },
            Ok(WsMessage::Close(_)) => {
                debug!("WebSocket client disconnected (close frame)");
                break;
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => continue,
            Err(e) => {
                debug!(error = %e, "WebSocket receive error");
                break;
            }
        };

        match handle_turn(&state, &text).await {
            Ok(reply) => {
                let frame = match reply.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode reply");
                        let error = Error::Internal(e.to_string());
                        let _ = sender.send(WsMessage::Close(Some(close_for(&error)))).await;
                        break;
                    }
                };
                if let Err(e) = sender.send(WsMessage::Text(frame)).await {
                    debug!(error = %e, "Failed to send reply");
                    break;
                }
            }
            Err(e) => {
                warn!(code = %e.code(), error = %e, "Closing conversation");
                let _ = sender.send(WsMessage::Close(Some(close_for(&e)))).await;
                break;
            }
        }
    }

    debug!("WebSocket connection closed");
}
