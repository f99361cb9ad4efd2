//! Protocol message definitions

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// UDP probe sent by discoverers; advertisers answer with their base URL
pub const PROBE_PAYLOAD: &[u8] = b"DISCOVER_SERVER";

/// Seconds since the Unix epoch
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────────────
// Conversation Messages
// ─────────────────────────────────────────────────────────────────

/// One conversation turn, as exchanged on `/ws` and stored in history
///
/// Every field is optional on the wire: a missing `sender` or `text` decodes
/// to an empty string, a missing `timestamp` to 0 and a missing `image` to
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Message {
    /// Name of the character who wrote the message
    pub sender: String,

    pub text: String,

    /// Receipt time in Unix seconds, assigned by whoever stores the message
    pub timestamp: i64,

    /// Optional media URL attached to the message
    pub image: Option<String>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: unix_now(),
            image: None,
        }
    }

    /// Attach a media URL
    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    /// Decode an inbound frame and stamp it with the receipt time
    ///
    /// Whatever timestamp the sender supplied is discarded.
    pub fn decode_inbound(frame: &str) -> Result<Self> {
        let mut message: Message = serde_json::from_str(frame)
            .map_err(|e| Error::malformed(format!("invalid message frame: {}", e)))?;
        message.timestamp = unix_now();
        Ok(message)
    }

    /// Serialize for the wire
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────

/// Identity document served at `GET /`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
}
