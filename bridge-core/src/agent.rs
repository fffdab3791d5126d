use async_trait::async_trait;
use craftlink_bridge_protocol::AgentTurn;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("agent failed: {message}")]
pub struct AgentError {
    pub message: String,
}

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The message-producing side of the bridge.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn process_user_message(&self, text: &str) -> Result<AgentTurn, AgentError>;

    async fn process_command_results(&self, results: &[String]) -> Result<AgentTurn, AgentError>;
}

/// Replies with whatever it was told and never issues commands.
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn process_user_message(&self, text: &str) -> Result<AgentTurn, AgentError> {
        Ok(AgentTurn::reply(text))
    }

    async fn process_command_results(&self, results: &[String]) -> Result<AgentTurn, AgentError> {
        if results.is_empty() {
            return Ok(AgentTurn::default());
        }
        Ok(AgentTurn::reply(results.join(", ")))
    }
}
