//! Typed LLM tasks.
//!
//! Tasks arrive as JSON documents tagged by `type` (`generate`, `complete`,
//! `chat`) and are validated into an [`LlmRequest`] before routing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{LlmRequest, Message, Role, DEFAULT_TEMPERATURE, MAX_TEMPERATURE};

#[derive(Debug, Error, PartialEq)]
pub enum TaskError {
    #[error("Missing input: {0}")]
    MissingInput(&'static str),
    #[error("Temperature {0} is outside 0.0..=2.0")]
    TemperatureOutOfRange(f32),
}

fn default_temperature() -> f32 { DEFAULT_TEMPERATURE }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTask {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTask {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmTask {
    Generate(PromptTask),
    Complete(PromptTask),
    Chat(ChatTask),
}

impl LlmTask {
    pub fn kind(&self) -> &'static str {
        match self {
            LlmTask::Generate(_) => "generate",
            LlmTask::Complete(_) => "complete",
            LlmTask::Chat(_)     => "chat",
        }
    }

    /// Validate the task and build the request it describes.
    pub fn into_request(self) -> Result<LlmRequest, TaskError> {
        let kind = self.kind();
        let (mut request, temperature, model, max_tokens, metadata) = match self {
            LlmTask::Generate(t) | LlmTask::Complete(t) => {
                if t.prompt.trim().is_empty() {
                    return Err(TaskError::MissingInput("prompt must not be empty"));
                }
                let mut request = LlmRequest::new(t.prompt);
                if let Some(system) = t.system_prompt {
                    request = request.with_system_prompt(system);
                }
                (request, t.temperature, t.model, t.max_tokens, t.metadata)
            }
            LlmTask::Chat(t) => {
                let request = chat_request(t.messages)?;
                (request, t.temperature, t.model, t.max_tokens, t.metadata)
            }
        };

        if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(TaskError::TemperatureOutOfRange(temperature));
        }
        request = request.with_temperature(temperature);
        if let Some(model) = model {
            request = request.with_model(model);
        }
        if let Some(max_tokens) = max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        for (key, value) in metadata {
            request = request.with_metadata(key, value);
        }
        Ok(request.with_metadata("task_type", serde_json::json!(kind)))
    }
}

/// System messages become the system prompt, the final user message becomes
/// the prompt and everything in between is history.
fn chat_request(messages: Vec<Message>) -> Result<LlmRequest, TaskError> {
    let (system, mut turns): (Vec<Message>, Vec<Message>) =
        messages.into_iter().partition(|m| m.role == Role::System);

    let last = turns
        .pop()
        .ok_or(TaskError::MissingInput("messages must contain a user turn"))?;
    if last.role != Role::User || last.content.trim().is_empty() {
        return Err(TaskError::MissingInput("last chat message must be a non-empty user turn"));
    }

    let mut request = LlmRequest::new(last.content).with_history(turns);
    if !system.is_empty() {
        let joined = system
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n\n");
        request = request.with_system_prompt(joined);
    }
    Ok(request)
}
