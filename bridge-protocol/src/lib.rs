use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version stamped on every outbound request, header and body alike.
pub const PROTOCOL_VERSION: u32 = 17_104_896;
/// Largest outbound frame the peer accepts, in bytes.
pub const MAX_FRAME_BYTES: usize = 661;
pub const SUCCESS_STATUS: &str = "success";
pub const PLAYER_MESSAGE_EVENT: &str = "PlayerMessage";

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessagePurpose {
    CommandRequest,
    Subscribe,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeader {
    pub request_id: String,
    pub message_purpose: MessagePurpose,
    pub version: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommandRequest {
    pub header: RequestHeader,
    pub body: CommandBody,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandBody {
    pub command_line: String,
    pub version: u32,
}

impl CommandRequest {
    pub fn new(request_id: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            header: RequestHeader {
                request_id: request_id.into(),
                message_purpose: MessagePurpose::CommandRequest,
                version: PROTOCOL_VERSION,
            },
            body: CommandBody {
                command_line: command_line.into(),
                version: PROTOCOL_VERSION,
            },
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub header: RequestHeader,
    pub body: SubscribeBody,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    pub event_name: String,
}

impl SubscribeRequest {
    pub fn new(request_id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            header: RequestHeader {
                request_id: request_id.into(),
                message_purpose: MessagePurpose::Subscribe,
                version: PROTOCOL_VERSION,
            },
            body: SubscribeBody {
                event_name: event_name.into(),
            },
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Wraps chat text into a `tellraw` command addressed to every player.
pub fn tellraw_command(text: &str) -> String {
    let escaped = Value::String(text.to_string());
    format!("tellraw @a {{\"rawtext\":[{{\"text\":{escaped}}}]}}")
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundHeader {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub message_purpose: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InboundFrame {
    #[serde(default)]
    pub header: InboundHeader,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Chat(ChatMessage),
    CommandResponse(CommandResponse),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub request_id: String,
    pub status_message: String,
}

impl InboundFrame {
    pub fn classify(self) -> Inbound {
        let body_str = |field: &str| {
            self.body
                .get(field)
                .and_then(Value::as_str)
                .map(ToString::to_string)
        };

        if self.header.event_name.as_deref() == Some(PLAYER_MESSAGE_EVENT)
            && body_str("type").as_deref() == Some("chat")
        {
            return Inbound::Chat(ChatMessage {
                sender: body_str("sender").unwrap_or_default(),
                message: body_str("message").unwrap_or_default(),
            });
        }

        if self.header.message_purpose.as_deref() == Some("commandResponse") {
            let Some(request_id) = self.header.request_id.clone() else {
                return Inbound::Ignored;
            };
            let status_message = body_str("statusMessage")
                .filter(|status| !status.is_empty())
                .unwrap_or_else(|| SUCCESS_STATUS.to_string());
            return Inbound::CommandResponse(CommandResponse {
                request_id,
                status_message,
            });
        }

        Inbound::Ignored
    }
}

pub fn parse_inbound(text: &str) -> Result<Inbound, serde_json::Error> {
    let frame = serde_json::from_str::<InboundFrame>(text)?;
    Ok(frame.classify())
}

/// One response cycle from the agent.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurn {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub new_session: bool,
}

impl AgentTurn {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Listening {
        address: String,
        hint: String,
    },
    Connected {
        peer: String,
    },
    Disconnected {
        #[serde(default)]
        code: Option<u16>,
        reason: String,
    },
    TransportError {
        message: String,
    },
    BatchTimedOut {
        batch_id: String,
        timeout_ms: u64,
        pending: usize,
    },
    PayloadRejected {
        bytes: usize,
        limit: usize,
    },
    Stopped {
        reason: String,
    },
}
