//! OpenAI-compatible chat agent
//!
//! Plays the character through any OpenAI-compatible API endpoint (OpenAI,
//! Ollama, vLLM, LM Studio, etc.). The model is asked to reply with a small
//! JSON object; when it asks for a drawing, the picture is generated through
//! `/images/generations` and its URL returned with the answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Agent, Answer, ForkOptions};
use crate::config::AgentSettings;
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// OpenAI API types (request/response)
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self { role: "system", content }
    }

    fn user(content: &str) -> Self {
        Self {
            role: "user",
            content: content.to_string(),
        }
    }

    fn assistant(content: String) -> Self {
        Self {
            role: "assistant",
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'static str,
    quality: &'static str,
    n: u8,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// The JSON object the model is instructed to produce
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelReply {
    text: Option<String>,
    image: Option<String>,
    draw: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Reply parsing
// ─────────────────────────────────────────────────────────────────

/// Strip an optional Markdown code fence (```` ```json ... ``` ````)
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parsed model output: the answer text, any direct image URL and any
/// drawing request
fn parse_reply(raw: &str) -> (String, Option<String>, Option<String>) {
    match serde_json::from_str::<ModelReply>(strip_code_fence(raw)) {
        Ok(reply) => {
            let draw = reply.draw.filter(|d| !d.trim().is_empty());
            let image = reply.image.filter(|i| !i.trim().is_empty());
            (reply.text.unwrap_or_default(), image, draw)
        }
        Err(e) => {
            debug!(error = %e, "Model reply is not JSON, using it verbatim");
            (raw.trim().to_string(), None, None)
        }
    }
}

/// Longest wait between two retries
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// 500ms, 1s, 2s, ... capped at [`MAX_RETRY_DELAY`]
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(500u64.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

fn instructions(name: &str, language: &str, goal: Option<&str>) -> String {
    let mut text = format!(
        "You are {name}.\n\
         Speak in the first person from the perspective of {name}.\n\
         Use only {language} to reply.\n"
    );
    if let Some(goal) = goal {
        text.push_str(goal);
        text.push('\n');
    }
    text.push_str(
        "Always answer with a RAW JSON object like this: \
         {\"text\": \"your answer\", \"draw\": \"description of a picture\"}\n\
         Where text is your answer, and draw describes a picture you want to show. \
         Omit draw when there is nothing to show.",
    );
    text
}

// ─────────────────────────────────────────────────────────────────
// OpenAI Agent
// ─────────────────────────────────────────────────────────────────

/// Connection shared by an agent and its forks
struct Endpoint {
    settings: AgentSettings,
    client: Client,
}

impl Endpoint {
    fn auth_header(&self) -> Option<String> {
        if self.settings.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.settings.api_key))
        }
    }

    /// POST `body` to `<base_url>/<path>`, retrying on 429, 5xx and connection errors
    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path);
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let backoff = retry_delay(attempt);
                debug!(attempt, ?backoff, "Retrying after error");
                tokio::time::sleep(backoff).await;
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(ref auth) = self.auth_header() {
                request = request.header("Authorization", auth);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<R>()
                            .await
                            .map_err(|e| Error::agent(format!("Failed to parse API response: {}", e)));
                    }

                    let body = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "Retryable API error: {}", body);
                        last_error = Some(Error::agent(format!("API error {}: {}", status, body)));
                    } else {
                        return Err(Error::agent(format!("API error {}: {}", status, body)));
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(attempt, error = %e, "Retryable connection error");
                    last_error = Some(Error::agent(format!("Connection error: {}", e)));
                }
                Err(e) => return Err(Error::agent(format!("Request error: {}", e))),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::agent("All retry attempts exhausted")))
    }
}

/// Character agent backed by an OpenAI-compatible API
pub struct OpenAiAgent {
    endpoint: Arc<Endpoint>,
    name: String,
    language: String,
    goal: Option<String>,
    history: Mutex<Vec<ChatMessage>>,
}

impl OpenAiAgent {
    pub fn new(settings: AgentSettings, name: impl Into<String>, language: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let name = name.into();
        info!(
            base_url = %settings.base_url,
            model = %settings.model,
            character = %name,
            "OpenAI-compatible agent created"
        );

        Ok(Self {
            endpoint: Arc::new(Endpoint { settings, client }),
            name,
            language: language.into(),
            goal: None,
            history: Mutex::new(Vec::new()),
        })
    }

    async fn chat(&self, text: &str) -> Result<String> {
        let mut messages = vec![ChatMessage::system(instructions(
            &self.name,
            &self.language,
            self.goal.as_deref(),
        ))];
        messages.extend(self.history.lock().iter().cloned());
        messages.push(ChatMessage::user(text));

        let request = ChatCompletionRequest {
            model: &self.endpoint.settings.model,
            messages,
        };
        let response: ChatCompletionResponse = self.endpoint.post("chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| Error::agent("No choices in API response"))
    }

    async fn draw(&self, prompt: &str) -> Result<String> {
        let request = ImageRequest {
            model: &self.endpoint.settings.image_model,
            prompt,
            size: "1024x1024",
            quality: "standard",
            n: 1,
        };
        let response: ImageResponse = self.endpoint.post("images/generations", &request).await?;

        response
            .data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| Error::agent("No image URL in API response"))
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn answer(&self, text: &str) -> Result<Answer> {
        let raw = self.chat(text).await?;
        let (reply, mut image, draw) = parse_reply(&raw);

        if let Some(prompt) = draw {
            debug!(character = %self.name, %prompt, "Drawing");
            image = Some(self.draw(&prompt).await?);
        }

        let mut history = self.history.lock();
        history.push(ChatMessage::user(text));
        history.push(ChatMessage::assistant(reply.clone()));

        Ok(Answer { text: reply, image })
    }

    fn fork(&self, options: ForkOptions) -> Arc<dyn Agent> {
        Arc::new(OpenAiAgent {
            endpoint: self.endpoint.clone(),
            name: self.name.clone(),
            language: options.language.unwrap_or_else(|| self.language.clone()),
            goal: options.goal.or_else(|| self.goal.clone()),
            history: Mutex::new(Vec::new()),
        })
    }
}
