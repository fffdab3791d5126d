use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    CoolingDown { remaining_secs: u64 },
}

/// Last accepted message time per sender.
///
/// Entries are overwritten, never evicted, so the ledger grows with the
/// number of distinct senders seen during the process lifetime.
#[derive(Debug, Clone)]
pub struct CooldownLedger {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl CooldownLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    pub fn check(&mut self, sender: &str) -> CooldownDecision {
        self.check_at(sender, Instant::now())
    }

    pub fn check_at(&mut self, sender: &str, now: Instant) -> CooldownDecision {
        if self.window.is_zero() {
            return CooldownDecision::Allowed;
        }

        if let Some(last) = self.last_seen.get(sender) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                let remaining = self.window - elapsed;
                let remaining_secs = remaining.as_millis().div_ceil(1000) as u64;
                return CooldownDecision::CoolingDown { remaining_secs };
            }
        }

        self.last_seen.insert(sender.to_string(), now);
        CooldownDecision::Allowed
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
