use std::fmt;

use uuid::Uuid;

/// Opaque token correlating one outbound request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, enough to tell requests apart in logs.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(5)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Draws random v4 UUIDs; the peer expects UUID-shaped request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdGenerator;

impl RequestIdGenerator {
    pub fn next_id(&self) -> RequestId {
        RequestId(Uuid::new_v4().to_string())
    }
}
