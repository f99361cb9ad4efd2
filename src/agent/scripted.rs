//! Deterministic offline agent
//!
//! Used by tests and for LAN demos without an API key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Agent, Answer, ForkOptions};
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// How the scripted agent builds its reply text
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Always the same text
    Fixed(String),
    /// `<name>: <input>`
    Echo,
}

/// Configuration for scripted agent behavior
#[derive(Debug, Clone)]
pub struct ScriptedConfig {
    pub reply: ScriptedReply,

    /// Image URL attached to every answer
    pub image: Option<String>,

    /// Fail every `answer` call
    pub fail: bool,

    /// Simulated thinking time per answer
    pub latency: Duration,
}

impl Default for ScriptedConfig {
    fn default() -> Self {
        Self {
            reply: ScriptedReply::Echo,
            image: None,
            fail: false,
            latency: Duration::ZERO,
        }
    }
}

/// One recorded `answer` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub language: String,
    pub goal: Option<String>,
    pub text: String,
}

/// Calls shared by an agent and all of its forks
#[derive(Debug, Default)]
struct CallLog {
    answers: Vec<ScriptedCall>,
    forks: u32,
}

// ─────────────────────────────────────────────────────────────────
// Scripted Agent
// ─────────────────────────────────────────────────────────────────

pub struct ScriptedAgent {
    name: String,
    language: String,
    goal: Option<String>,
    config: ScriptedConfig,
    log: Arc<Mutex<CallLog>>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self::with_config(name, language, ScriptedConfig::default())
    }

    pub fn with_config(name: impl Into<String>, language: impl Into<String>, config: ScriptedConfig) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            goal: None,
            config,
            log: Arc::new(Mutex::new(CallLog::default())),
        }
    }

    /// Every `answer` call made on this agent or its forks, in order
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.log.lock().answers.clone()
    }

    pub fn answer_count(&self) -> usize {
        self.log.lock().answers.len()
    }

    pub fn fork_count(&self) -> u32 {
        self.log.lock().forks
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn answer(&self, text: &str) -> Result<Answer> {
        self.log.lock().answers.push(ScriptedCall {
            language: self.language.clone(),
            goal: self.goal.clone(),
            text: text.to_string(),
        });

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.config.fail {
            return Err(Error::agent("scripted failure"));
        }

        let text = match self.config.reply {
            ScriptedReply::Fixed(ref fixed) => fixed.clone(),
            ScriptedReply::Echo => format!("{}: {}", self.name, text),
        };

        Ok(Answer {
            text,
            image: self.config.image.clone(),
        })
    }

    fn fork(&self, options: ForkOptions) -> Arc<dyn Agent> {
        self.log.lock().forks += 1;
        Arc::new(ScriptedAgent {
            name: self.name.clone(),
            language: options.language.unwrap_or_else(|| self.language.clone()),
            goal: options.goal.or_else(|| self.goal.clone()),
            config: self.config.clone(),
            log: self.log.clone(),
        })
    }
}
