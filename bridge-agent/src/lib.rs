use async_trait::async_trait;
use craftlink_bridge_config::ModelConfig;
use craftlink_bridge_core::{Agent, AgentError};
use craftlink_bridge_protocol::AgentTurn;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod protocol;

use protocol::request::{build_responses_request_payload, build_text_message};
use protocol::response::parse_output_text;
use protocol::transport::send_responses_http;

pub const DEFAULT_INSTRUCTIONS: &str = "\
You are an assistant living inside a Minecraft Bedrock world, talking to players through chat.
Reply with a single JSON object and nothing else:
{\"text\": \"<chat reply or null>\", \"commands\": [\"<command without leading slash>\", ...]}
Use commands only when the player asks you to change the world. After commands run you will
receive their results and may reply again or issue further commands. Keep replies short.";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("responses api returned non-success status: {status}; body: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("invalid responses payload: {0}")]
    ParsePayload(#[from] serde_json::Error),
    #[error("responses api returned empty output")]
    EmptyOutput,
}

#[derive(Debug, Default, Deserialize)]
struct ModelReply {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    commands: Vec<String>,
}

/// Agent backed by an OpenAI-compatible Responses endpoint.
///
/// Conversation history is kept in memory; once it reaches the configured
/// cap it is cleared and the next turn is flagged as a new session. Calls
/// are serialized so concurrent turn chains see a consistent history.
pub struct ResponsesAgent {
    config: ModelConfig,
    instructions: String,
    client: reqwest::Client,
    history: Mutex<Vec<Value>>,
}

impl ResponsesAgent {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_instructions(config, DEFAULT_INSTRUCTIONS)
    }

    pub fn with_instructions(config: ModelConfig, instructions: impl Into<String>) -> Self {
        Self {
            config,
            instructions: instructions.into(),
            client: reqwest::Client::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    async fn converse(&self, user_text: &str) -> Result<AgentTurn, ModelError> {
        let mut history = self.history.lock().await;

        let new_session = self.config.max_history_items > 0
            && history.len() + 2 > self.config.max_history_items;
        if new_session {
            info!(items = history.len(), "conversation history full; starting new session");
            history.clear();
        }

        history.push(build_text_message("user", user_text));
        let payload =
            build_responses_request_payload(&self.config.model, &self.instructions, &history);
        let body = match send_responses_http(
            &self.client,
            &self.config.base_url,
            &self.config.api_key,
            &payload,
        )
        .await
        {
            Ok(body) => body,
            Err(err) => {
                history.pop();
                return Err(err);
            }
        };
        let output_text = match parse_output_text(&body) {
            Ok(text) => text,
            Err(err) => {
                history.pop();
                return Err(err);
            }
        };

        history.push(build_text_message("assistant", &output_text));
        let mut turn = parse_turn(&output_text);
        turn.new_session = new_session;
        debug!(
            commands = turn.commands.len(),
            has_text = turn.text.is_some(),
            "agent turn parsed"
        );
        Ok(turn)
    }
}

#[async_trait]
impl Agent for ResponsesAgent {
    async fn process_user_message(&self, text: &str) -> Result<AgentTurn, AgentError> {
        self.converse(text)
            .await
            .map_err(|err| AgentError::new(err.to_string()))
    }

    async fn process_command_results(&self, results: &[String]) -> Result<AgentTurn, AgentError> {
        self.converse(&format_command_results(results))
            .await
            .map_err(|err| AgentError::new(err.to_string()))
    }
}

fn format_command_results(results: &[String]) -> String {
    let mut message = String::from("Command results:");
    for (index, result) in results.iter().enumerate() {
        message.push_str(&format!("\n{}. {}", index + 1, result));
    }
    message
}

/// Reads the model's JSON reply; anything that is not the expected object is
/// treated as plain chat text.
fn parse_turn(output_text: &str) -> AgentTurn {
    let candidate = strip_code_fence(output_text);
    match serde_json::from_str::<ModelReply>(candidate) {
        Ok(reply) => AgentTurn {
            text: reply
                .text
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
            commands: reply
                .commands
                .into_iter()
                .map(|command| command.trim().trim_start_matches('/').to_string())
                .filter(|command| !command.is_empty())
                .collect(),
            new_session: false,
        },
        Err(_) => AgentTurn::reply(output_text.trim()),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
