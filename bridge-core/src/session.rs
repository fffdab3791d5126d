use std::sync::{Arc, Mutex};

use craftlink_bridge_protocol::{parse_inbound, Inbound, PLAYER_MESSAGE_EVENT};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::batch::{BatchTracker, RecordOutcome};
use crate::chunk::{ChunkError, ChunkPacker};
use crate::cooldown::CooldownLedger;
use crate::filter::MessageFilter;
use crate::request_id::RequestId;
use crate::status::StatusReporter;
use crate::turn::{TurnError, TurnProcessor};
use crate::{CoreConfig, FrameSink};

const GREETING: &str = "§l§b- WebSocket connected!";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid player pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Process-wide state shared by every peer session: the agent, the cooldown
/// ledger and the validated settings.
pub struct BridgeRuntime {
    config: CoreConfig,
    agent: Arc<dyn Agent>,
    packer: ChunkPacker,
    filter: MessageFilter,
    cooldown: Arc<Mutex<CooldownLedger>>,
    status: StatusReporter,
}

impl BridgeRuntime {
    pub fn new(
        config: CoreConfig,
        agent: Arc<dyn Agent>,
        status: StatusReporter,
    ) -> Result<Self, RuntimeError> {
        let packer = ChunkPacker::new(config.max_frame_bytes)?;
        let filter = MessageFilter::new(
            config.player_pattern.as_deref(),
            config.wake_word.as_deref(),
        )?;
        let cooldown = Arc::new(Mutex::new(CooldownLedger::new(config.cooldown)));
        Ok(Self {
            config,
            agent,
            packer,
            filter,
            cooldown,
            status,
        })
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    /// Builds the per-peer state for a freshly accepted connection.
    pub fn open_session(&self, sink: Arc<dyn FrameSink>) -> BridgeSession {
        let tracker = BatchTracker::new(self.config.request_timeout, self.status.clone());
        let processor = TurnProcessor::new(
            Arc::clone(&self.agent),
            tracker.clone(),
            sink,
            self.packer.clone(),
            self.filter.clone(),
            Arc::clone(&self.cooldown),
            self.status.clone(),
        );
        BridgeSession {
            processor: Arc::new(processor),
            tracker,
            fail_pending_on_disconnect: self.config.fail_pending_on_disconnect,
        }
    }
}

#[derive(Debug)]
pub enum FrameDisposition {
    Malformed,
    Chat(JoinHandle<()>),
    Response(RecordOutcome),
    Ignored,
}

/// State bound to one connected peer; dropped when the peer goes away.
pub struct BridgeSession {
    processor: Arc<TurnProcessor>,
    tracker: BatchTracker,
    fail_pending_on_disconnect: bool,
}

impl BridgeSession {
    /// Greets the players and subscribes to chat events.
    pub fn start(&self) -> Result<(), TurnError> {
        self.processor.send_message(GREETING)?;
        self.processor.subscribe(PLAYER_MESSAGE_EVENT)
    }

    pub fn processor(&self) -> &Arc<TurnProcessor> {
        &self.processor
    }

    pub fn tracker(&self) -> &BatchTracker {
        &self.tracker
    }

    /// Routes one inbound text frame. Chat messages run on their own task so
    /// the reader keeps draining command responses while a turn waits.
    pub fn handle_frame(&self, text: &str) -> FrameDisposition {
        let inbound = match parse_inbound(text) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return FrameDisposition::Malformed;
            }
        };

        match inbound {
            Inbound::Chat(chat) => {
                let processor = Arc::clone(&self.processor);
                FrameDisposition::Chat(tokio::spawn(async move {
                    match processor.handle_chat(&chat.sender, &chat.message).await {
                        Ok(outcome) => debug!(sender = %chat.sender, ?outcome, "chat handled"),
                        Err(err) => warn!(sender = %chat.sender, %err, "turn chain ended with error"),
                    }
                }))
            }
            Inbound::CommandResponse(response) => FrameDisposition::Response(
                self.tracker.record_result(
                    &RequestId::from(response.request_id),
                    response.status_message,
                ),
            ),
            Inbound::Ignored => FrameDisposition::Ignored,
        }
    }

    /// Tears the session down. Pending batches either keep running until
    /// their own deadlines or fail now, depending on configuration.
    pub fn close(&self) -> usize {
        if !self.fail_pending_on_disconnect {
            let pending = self.tracker.pending_batches();
            if pending > 0 {
                info!(pending, "peer closed; pending batches will expire on their own");
            }
            return 0;
        }
        self.tracker.fail_all()
    }
}
