//! The capability interface every character agent implements

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What the agent says back, optionally with a picture
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub image: Option<String>,
}

/// Overrides applied when forking an agent
#[derive(Debug, Clone, Default)]
pub struct ForkOptions {
    /// Reply language; `None` keeps the parent's
    pub language: Option<String>,
    /// Extra instruction steering the conversation; `None` keeps the parent's
    pub goal: Option<String>,
}

impl ForkOptions {
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            goal: None,
        }
    }

    pub fn goal(goal: impl Into<String>) -> Self {
        Self {
            language: None,
            goal: Some(goal.into()),
        }
    }
}

/// A character that can answer and be forked into independent copies
///
/// Each instance keeps its own conversational memory. Callers never run two
/// `answer` calls on the same instance concurrently.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Character name
    fn name(&self) -> &str;

    /// Answer one user turn
    async fn answer(&self, text: &str) -> Result<Answer>;

    /// New instance of the same character with empty memory
    fn fork(&self, options: ForkOptions) -> Arc<dyn Agent>;
}
