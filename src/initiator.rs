//! Autonomous initiator
//!
//! Waits for the discoverer to find another character, prepares an opener and
//! a goal-driven fork of our own character, then talks to the peer over its
//! `/ws` channel. The conversation is reopened forever on a fixed delay.

use std::sync::Arc;

use backoff::backoff::{Backoff, Constant};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::{Agent, ForkOptions};
use crate::config::InitiatorSettings;
use crate::discovery::{Peer, PeerDirectory};
use crate::error::{Error, Result};
use crate::protocol::Message;

pub const GOAL_PROMPT: &str = "What is your main goal in life (write it at 3rd person) ?";

pub const OPENER_PROMPT: &str =
    "What would you say to someone you just met to engage the conversation ? (say it as like you speak to this person)";

/// Sent instead of the opener after a reconnection
const FILLERS: &[&str] = &["?", "Are you still there?", "Hello?", "Sorry, I think we were cut off."];

/// Filler for the `retry`-th reconnection (1-based)
pub fn filler(retry: u32) -> &'static str {
    let index = retry.saturating_sub(1) as usize % FILLERS.len();
    FILLERS[index]
}

/// Goal given to the working fork
pub fn conversation_goal(peer_name: &str, goal: &str) -> String {
    format!(
        "You are talking to {}. Check if you know him/her. Try to follow your goal: {}",
        peer_name, goal
    )
}

/// Everything prepared before the first connection
pub struct Conversation {
    pub peer: Peer,
    pub url: Url,
    pub opener: String,
    pub agent: Arc<dyn Agent>,
}

pub struct Initiator {
    agent: Arc<dyn Agent>,
    directory: Arc<PeerDirectory>,
    settings: InitiatorSettings,
}

impl Initiator {
    pub fn new(agent: Arc<dyn Agent>, directory: Arc<PeerDirectory>, settings: InitiatorSettings) -> Self {
        Self {
            agent,
            directory,
            settings,
        }
    }

    /// Find a peer, prepare, then converse forever
    ///
    /// Returns `Ok(())` only when the only live peers are ourselves.
    pub async fn run(&self) -> Result<()> {
        let Some(peer) = self.wait_for_peer().await else {
            warn!("Nobody to talk to");
            return Ok(());
        };

        let conversation = self.prepare(peer).await?;
        self.converse(conversation).await
    }

    /// Poll until the peer set is non-empty, then pick someone else
    pub async fn wait_for_peer(&self) -> Option<Peer> {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        loop {
            interval.tick().await;
            if !self.directory.is_empty() {
                break;
            }
            debug!("Waiting for peers");
        }
        self.directory.first_other_than(self.agent.name())
    }

    /// Ask our character for a goal and an opener, and fork the working agent
    pub async fn prepare(&self, peer: Peer) -> Result<Conversation> {
        let peer_name = peer.name.clone().unwrap_or_else(|| peer.address.clone());
        let url = peer.ws_url()?;
        info!(peer = %peer_name, %url, "Talking to peer");

        let goal = self
            .agent
            .fork(ForkOptions::language(self.settings.goal_language.clone()))
            .answer(GOAL_PROMPT)
            .await?;
        info!(goal = %goal.text, "Goal");

        let opener = self.agent.fork(ForkOptions::default()).answer(OPENER_PROMPT).await?;

        let agent = self
            .agent
            .fork(ForkOptions::goal(conversation_goal(&peer_name, &goal.text)));

        Ok(Conversation {
            peer,
            url,
            opener: opener.text,
            agent,
        })
    }

    /// Reconnect loop
    ///
    /// Only returns on a fatal error; every other failure is followed by a
    /// new attempt after the reconnect delay.
    pub async fn converse(&self, conversation: Conversation) -> Result<()> {
        let mut backoff = Constant::new(self.settings.reconnect_delay());
        let mut retries: u32 = 0;

        loop {
            let first = if retries == 0 {
                conversation.opener.clone()
            } else {
                filler(retries).to_string()
            };

            let e = match self.talk(&conversation, first).await {
                Ok(()) => Error::ConnectionClosed {
                    reason: "stream ended".to_string(),
                },
                Err(e) => e,
            };
            if e.is_fatal() {
                return Err(e);
            }
            if e.is_retryable() {
                info!(peer = ?conversation.peer.name, reason = %e, "Conversation interrupted");
            } else {
                warn!(peer = ?conversation.peer.name, code = %e.code(), error = %e, "Conversation failed");
            }

            retries += 1;
            let delay = backoff.next_backoff().unwrap_or_else(|| self.settings.reconnect_delay());
            info!(attempt = retries, delay_ms = delay.as_millis() as u64, "Waiting before reconnection");
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection: send `first`, then answer every reply until closed
    ///
    /// A close frame from the peer is reported as `ConnectionClosed`.
    async fn talk(&self, conversation: &Conversation, first: String) -> Result<()> {
        let (stream, _response) = connect_async(conversation.url.as_str())
            .await
            .map_err(|e| Error::connection_failed(conversation.url.as_str(), e.to_string()))?;
        debug!(url = %conversation.url, "Connected");
        let (mut write, mut read) = stream.split();

        let name = conversation.agent.name().to_string();
        info!("{} > {}", name, first);
        send_message(&mut write, Message::new(name.clone(), first)).await?;

        while let Some(frame) = read.next().await {
            let text = match frame? {
                WsMessage::Text(text) => text,
                WsMessage::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(Error::ConnectionClosed { reason });
                }
                _ => continue,
            };

            let reply: Message = serde_json::from_str(&text)
                .map_err(|e| Error::malformed(format!("invalid reply frame: {}", e)))?;
            info!(
                "{} > {} [{}]",
                reply.sender,
                reply.text,
                reply.image.as_deref().unwrap_or("no image")
            );

            let next = conversation.agent.answer(&reply.text).await?;
            info!("{} > {}", name, next.text);
            send_message(&mut write, Message::new(name.clone(), next.text)).await?;
        }

        Ok(())
    }
}

/// Send one conversation message
async fn send_message<S>(write: &mut S, message: Message) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
{
    write.send(WsMessage::Text(message.to_frame()?)).await?;
    Ok(())
}
