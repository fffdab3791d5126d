use std::time::Duration;

use craftlink_bridge_protocol::MAX_FRAME_BYTES;
use thiserror::Error;

mod agent;
mod batch;
mod chunk;
mod cooldown;
mod filter;
mod request_id;
mod session;
mod status;
#[cfg(test)]
mod test_support;
mod turn;

pub use agent::{Agent, AgentError, EchoAgent};
pub use batch::{BatchError, BatchHandle, BatchId, BatchTracker, RecordOutcome};
pub use chunk::{ChunkError, ChunkPacker, Chunks};
pub use cooldown::{CooldownDecision, CooldownLedger};
pub use filter::MessageFilter;
pub use request_id::{RequestId, RequestIdGenerator};
pub use session::{BridgeRuntime, BridgeSession, FrameDisposition, RuntimeError};
pub use status::StatusReporter;
pub use turn::{ChatOutcome, TurnError, TurnProcessor, AI_PREFIX};

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub request_timeout: Duration,
    pub max_frame_bytes: usize,
    pub cooldown: Duration,
    pub wake_word: Option<String>,
    pub player_pattern: Option<String>,
    pub fail_pending_on_disconnect: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_frame_bytes: MAX_FRAME_BYTES,
            cooldown: Duration::from_secs(5),
            wake_word: None,
            player_pattern: None,
            fail_pending_on_disconnect: false,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("no peer is connected")]
    NotConnected,
    #[error("peer link is closed")]
    Closed,
}

/// Outbound half of the peer transport.
///
/// Implementations must not block: frames are queued and written by the
/// transport's own task.
pub trait FrameSink: Send + Sync {
    fn send_text(&self, frame: String) -> Result<(), LinkError>;
}
