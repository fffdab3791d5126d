use std::sync::{Arc, Mutex, PoisonError};

use craftlink_bridge_protocol::{
    tellraw_command, AgentTurn, CommandRequest, StatusEvent, SubscribeRequest,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError};
use crate::batch::{BatchError, BatchTracker};
use crate::chunk::{ChunkError, ChunkPacker};
use crate::cooldown::{CooldownDecision, CooldownLedger};
use crate::filter::MessageFilter;
use crate::request_id::{RequestId, RequestIdGenerator};
use crate::status::StatusReporter;
use crate::{FrameSink, LinkError};

pub const AI_PREFIX: &str = "§e<AI> §r";
const NEW_SESSION_NOTICE: &str = "New conversation started";
const COMMAND_TOO_LONG_NOTICE: &str = "§c[runCommand] command is too long to execute";
const REPLY_TOO_LONG_NOTICE: &str = "§c[AI] reply could not be split into sendable chunks";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("outbound payload is {bytes} bytes, limit is {limit}")]
    PayloadTooLarge { bytes: usize, limit: usize },
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    CoolingDown { remaining_secs: u64 },
    Filtered,
    Completed { turns: usize },
}

/// Drives one chat message through the agent, the peer and back until the
/// agent stops issuing commands.
pub struct TurnProcessor {
    agent: Arc<dyn Agent>,
    tracker: BatchTracker,
    sink: Arc<dyn FrameSink>,
    packer: ChunkPacker,
    filter: MessageFilter,
    cooldown: Arc<Mutex<CooldownLedger>>,
    ids: RequestIdGenerator,
    status: StatusReporter,
}

impl TurnProcessor {
    pub fn new(
        agent: Arc<dyn Agent>,
        tracker: BatchTracker,
        sink: Arc<dyn FrameSink>,
        packer: ChunkPacker,
        filter: MessageFilter,
        cooldown: Arc<Mutex<CooldownLedger>>,
        status: StatusReporter,
    ) -> Self {
        Self {
            agent,
            tracker,
            sink,
            packer,
            filter,
            cooldown,
            ids: RequestIdGenerator,
            status,
        }
    }

    pub async fn handle_chat(&self, sender: &str, message: &str) -> Result<ChatOutcome, TurnError> {
        let decision = self
            .cooldown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(sender);
        if let CooldownDecision::CoolingDown { remaining_secs } = decision {
            debug!(sender, remaining_secs, "sender is cooling down");
            self.notify(&format!(
                "§e<AI> §c{sender} is on cooldown for {remaining_secs} more seconds"
            ));
            return Ok(ChatOutcome::CoolingDown { remaining_secs });
        }

        if !self.filter.accepts(sender, message) {
            return Ok(ChatOutcome::Filtered);
        }

        info!(sender, "forwarding chat message to agent");
        let initial = self
            .agent
            .process_user_message(&format!("<{sender}> {message}"))
            .await?;
        let turns = self.run_turn_chain(initial).await?;
        Ok(ChatOutcome::Completed { turns })
    }

    /// Presents `turn`, then keeps feeding command results back to the agent
    /// until a turn carries no commands. A failed batch ends the chain.
    pub async fn run_turn_chain(&self, turn: AgentTurn) -> Result<usize, TurnError> {
        let mut current = turn;
        let mut turns = 0;

        loop {
            turns += 1;
            self.present_turn(&current);
            if !current.has_commands() {
                return Ok(turns);
            }

            info!(count = current.commands.len(), "executing command batch");
            let next: Result<AgentTurn, TurnError> =
                match self.execute_commands(&current.commands).await {
                    Ok(results) => {
                        info!(
                            results = results.len(),
                            "command batch finished; returning results to agent"
                        );
                        self.agent
                            .process_command_results(&results)
                            .await
                            .map_err(TurnError::from)
                    }
                    Err(err) => Err(err.into()),
                };

            current = match next {
                Ok(turn) => turn,
                Err(err) => {
                    warn!(%err, "command batch failed");
                    self.notify(&format!("§cerror while executing command batch: {err}"));
                    return Err(err);
                }
            };
        }
    }

    pub async fn execute_commands(&self, commands: &[String]) -> Result<Vec<String>, BatchError> {
        let handle = self.tracker.create_batch(commands, |request_id, command| {
            if let Err(err) = self.run_command(command, Some(request_id)) {
                warn!(request = request_id.short(), %err, "command was not dispatched");
            }
        });
        handle.wait().await
    }

    /// Sends one command request. Tracked commands (with a request id) are
    /// echoed to chat before they go out.
    pub fn run_command(&self, command: &str, request_id: Option<&RequestId>) -> Result<(), TurnError> {
        let tracked = request_id.is_some();
        let request_id = request_id.cloned().unwrap_or_else(|| self.ids.next_id());
        let request = CommandRequest::new(request_id.as_str(), command);

        let frame = match self.checked_frame(&request) {
            Ok(frame) => frame,
            Err(err @ TurnError::PayloadTooLarge { .. }) => {
                self.notify(COMMAND_TOO_LONG_NOTICE);
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if tracked {
            self.notify(&format!("§e[runCommand] §r: {command}"));
            info!(request = request_id.short(), command, "running command");
        }
        self.sink.send_text(frame)?;
        Ok(())
    }

    /// Sends `text` to every player, split into as many `tellraw` frames as
    /// the frame limit requires. The whole text is packed before the first
    /// frame goes out, so unpackable text sends nothing. Returns the number of
    /// frames sent.
    pub fn send_message(&self, text: &str) -> Result<usize, TurnError> {
        let chunks = match self.packer.pack(text) {
            Ok(chunks) => chunks,
            Err(err) => {
                if let ChunkError::CharExceedsBudget {
                    frame_bytes,
                    budget,
                    ..
                } = err
                {
                    self.status.emit(StatusEvent::PayloadRejected {
                        bytes: frame_bytes,
                        limit: budget,
                    });
                }
                warn!(%err, "chat text cannot be packed into frames; nothing sent");
                return Err(err.into());
            }
        };

        let mut sent = 0;
        for chunk in chunks {
            let request = CommandRequest::new(self.ids.next_id().as_str(), tellraw_command(chunk));
            let frame = self.checked_frame(&request)?;
            self.sink.send_text(frame)?;
            sent += 1;
        }
        Ok(sent)
    }

    pub fn subscribe(&self, event_name: &str) -> Result<(), TurnError> {
        let frame = SubscribeRequest::new(self.ids.next_id().as_str(), event_name).to_frame()?;
        self.sink.send_text(frame)?;
        info!(event = event_name, "subscribed to event");
        Ok(())
    }

    fn present_turn(&self, turn: &AgentTurn) {
        if turn.new_session {
            self.notify(NEW_SESSION_NOTICE);
        }
        if let Some(text) = turn.text.as_deref().filter(|text| !text.is_empty()) {
            if let Err(err) = self.send_message(&format!("{AI_PREFIX}{text}")) {
                if matches!(err, TurnError::Chunk(_)) {
                    self.notify(REPLY_TOO_LONG_NOTICE);
                }
                debug!(%err, "agent reply was not delivered");
            }
        }
    }

    /// Best-effort chat notice; failures are logged, never propagated.
    fn notify(&self, text: &str) {
        if let Err(err) = self.send_message(text) {
            debug!(%err, notice = text, "notice was not delivered");
        }
    }

    fn checked_frame(&self, request: &CommandRequest) -> Result<String, TurnError> {
        let frame = request.to_frame()?;
        let bytes = frame.len();
        let limit = self.packer.max_frame_bytes();
        if bytes > limit {
            warn!(bytes, limit, "outbound payload too large; not sent");
            self.status.emit(StatusEvent::PayloadRejected { bytes, limit });
            return Err(TurnError::PayloadTooLarge { bytes, limit });
        }
        Ok(frame)
    }
}
