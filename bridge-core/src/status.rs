use craftlink_bridge_protocol::StatusEvent;
use tokio::sync::mpsc::UnboundedSender;

/// Fans status changes out to an optional subscriber (a status UI, the
/// JSON-lines feed). Sending never fails the caller.
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    tx: Option<UnboundedSender<StatusEvent>>,
}

impl StatusReporter {
    pub fn new(tx: UnboundedSender<StatusEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: StatusEvent) {
        if let Some(tx) = self.tx.as_ref() {
            let _ = tx.send(event);
        }
    }
}
