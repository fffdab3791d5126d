use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use craftlink_bridge_protocol::StatusEvent;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::request_id::{RequestId, RequestIdGenerator};
use crate::status::StatusReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("command batch {batch_id} timed out ({}ms)", timeout.as_millis())]
    TimedOut { batch_id: BatchId, timeout: Duration },
    #[error("peer disconnected before command batch {batch_id} completed")]
    Disconnected { batch_id: BatchId },
    #[error("command batch {batch_id} was abandoned by its tracker")]
    Abandoned { batch_id: BatchId },
}

type Completion = oneshot::Sender<Result<Vec<String>, BatchError>>;

struct BatchRecord {
    expected: usize,
    results: Vec<String>,
    request_ids: Vec<RequestId>,
    completion: Completion,
    deadline: Option<AbortHandle>,
}

#[derive(Default)]
struct TrackerState {
    next_batch: u64,
    batches: HashMap<BatchId, BatchRecord>,
    owners: HashMap<RequestId, BatchId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Unknown, already-resolved or expired request id.
    Discarded,
    Collected {
        batch_id: BatchId,
        collected: usize,
        expected: usize,
    },
    Completed {
        batch_id: BatchId,
    },
}

/// Correlates command responses with the batch that issued them.
///
/// Each batch leaves the table exactly once: when its last result arrives,
/// when its deadline fires, or when [`BatchTracker::fail_all`] drains it.
/// Whichever path removes the record under the lock is the one that settles
/// the completion handle.
#[derive(Clone)]
pub struct BatchTracker {
    state: Arc<Mutex<TrackerState>>,
    timeout: Duration,
    ids: RequestIdGenerator,
    status: StatusReporter,
}

impl BatchTracker {
    pub fn new(timeout: Duration, status: StatusReporter) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            timeout,
            ids: RequestIdGenerator,
            status,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a batch, then hands each command with its fresh request id
    /// to `dispatch`. Must be called inside a tokio runtime.
    pub fn create_batch<F>(&self, commands: &[String], mut dispatch: F) -> BatchHandle
    where
        F: FnMut(&RequestId, &str),
    {
        if commands.is_empty() {
            return BatchHandle::Ready(Vec::new());
        }

        let (completion, receiver) = oneshot::channel();
        let (batch_id, request_ids) = {
            let mut state = self.lock();
            state.next_batch += 1;
            let batch_id = BatchId(state.next_batch);

            let mut request_ids = Vec::with_capacity(commands.len());
            for _ in commands {
                let mut request_id = self.ids.next_id();
                while state.owners.contains_key(&request_id) {
                    request_id = self.ids.next_id();
                }
                state.owners.insert(request_id.clone(), batch_id);
                request_ids.push(request_id);
            }

            let deadline = tokio::spawn(expire_after(
                Arc::clone(&self.state),
                batch_id,
                self.timeout,
                self.status.clone(),
            ))
            .abort_handle();

            state.batches.insert(
                batch_id,
                BatchRecord {
                    expected: commands.len(),
                    results: Vec::with_capacity(commands.len()),
                    request_ids: request_ids.clone(),
                    completion,
                    deadline: Some(deadline),
                },
            );
            (batch_id, request_ids)
        };

        debug!(%batch_id, commands = commands.len(), "command batch created");
        for (request_id, command) in request_ids.iter().zip(commands) {
            dispatch(request_id, command);
        }

        BatchHandle::Pending {
            batch_id,
            request_ids,
            receiver,
        }
    }

    pub fn record_result(&self, request_id: &RequestId, result: String) -> RecordOutcome {
        let mut state = self.lock();
        let Some(batch_id) = state.owners.remove(request_id) else {
            debug!(request_id = %request_id, "discarding result for untracked request");
            return RecordOutcome::Discarded;
        };
        let Some(record) = state.batches.get_mut(&batch_id) else {
            return RecordOutcome::Discarded;
        };

        record.results.push(result);
        let collected = record.results.len();
        let expected = record.expected;
        if collected < expected {
            return RecordOutcome::Collected {
                batch_id,
                collected,
                expected,
            };
        }

        let Some(mut record) = state.batches.remove(&batch_id) else {
            return RecordOutcome::Discarded;
        };
        drop(state);

        if let Some(deadline) = record.deadline.take() {
            deadline.abort();
        }
        info!(%batch_id, results = collected, "command batch resolved");
        let _ = record.completion.send(Ok(record.results));
        RecordOutcome::Completed { batch_id }
    }

    /// Fails every pending batch at once, e.g. when the peer goes away.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(BatchId, BatchRecord)> = {
            let mut state = self.lock();
            state.owners.clear();
            state.batches.drain().collect()
        };

        let count = drained.len();
        for (batch_id, mut record) in drained {
            if let Some(deadline) = record.deadline.take() {
                deadline.abort();
            }
            warn!(%batch_id, "failing pending command batch after disconnect");
            let _ = record
                .completion
                .send(Err(BatchError::Disconnected { batch_id }));
        }
        count
    }

    pub fn pending_batches(&self) -> usize {
        self.lock().batches.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.lock().owners.len()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<TrackerState>) -> MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn expire_after(
    state: Arc<Mutex<TrackerState>>,
    batch_id: BatchId,
    timeout: Duration,
    status: StatusReporter,
) {
    tokio::time::sleep(timeout).await;

    let record = {
        let mut state = lock_state(&state);
        let Some(record) = state.batches.remove(&batch_id) else {
            return;
        };
        for request_id in &record.request_ids {
            state.owners.remove(request_id);
        }
        record
    };

    let pending = record.expected - record.results.len();
    warn!(
        %batch_id,
        timeout_ms = timeout.as_millis() as u64,
        pending,
        "command batch timed out"
    );
    status.emit(StatusEvent::BatchTimedOut {
        batch_id: batch_id.to_string(),
        timeout_ms: timeout.as_millis() as u64,
        pending,
    });
    let _ = record
        .completion
        .send(Err(BatchError::TimedOut { batch_id, timeout }));
}

/// Completion handle for one batch; await it with [`BatchHandle::wait`].
pub enum BatchHandle {
    /// The empty batch, which is never tracked.
    Ready(Vec<String>),
    Pending {
        batch_id: BatchId,
        request_ids: Vec<RequestId>,
        receiver: oneshot::Receiver<Result<Vec<String>, BatchError>>,
    },
}

impl BatchHandle {
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            Self::Ready(_) => None,
            Self::Pending { batch_id, .. } => Some(*batch_id),
        }
    }

    pub fn request_ids(&self) -> &[RequestId] {
        match self {
            Self::Ready(_) => &[],
            Self::Pending { request_ids, .. } => request_ids.as_slice(),
        }
    }

    pub async fn wait(self) -> Result<Vec<String>, BatchError> {
        match self {
            Self::Ready(results) => Ok(results),
            Self::Pending {
                batch_id, receiver, ..
            } => receiver
                .await
                .unwrap_or(Err(BatchError::Abandoned { batch_id })),
        }
    }
}
