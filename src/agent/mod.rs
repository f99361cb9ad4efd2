//! Character agents
//!
//! The server and the initiator only see [`Agent`]: `answer` one turn, or
//! `fork` an independent copy with its own memory, language and goal.

mod openai;
mod scripted;
mod traits;

pub use openai::OpenAiAgent;
pub use scripted::{ScriptedAgent, ScriptedCall, ScriptedConfig, ScriptedReply};
pub use traits::{Agent, Answer, ForkOptions};

use std::sync::Arc;

use tracing::warn;

use crate::config::{AgentProvider, TellarConfig};
use crate::error::Result;

/// Build the configured agent for the configured character
pub fn build_agent(config: &TellarConfig) -> Result<Arc<dyn Agent>> {
    let name = config.character_name()?;
    let language = config.character.language.clone();

    match config.agent.provider {
        AgentProvider::Openai => {
            if config.agent.api_key.is_empty() && config.agent.base_url.contains("api.openai.com") {
                warn!("No API key configured for api.openai.com; set OPENAI_API_KEY");
            }
            Ok(Arc::new(OpenAiAgent::new(config.agent.clone(), name, language)?))
        }
        AgentProvider::Scripted => Ok(Arc::new(ScriptedAgent::new(name, language))),
    }
}
