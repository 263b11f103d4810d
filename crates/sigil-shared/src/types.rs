use serde::{Deserialize, Serialize};

use crate::constants::NORMAL_CLOSE_CODE;
use crate::error::ProtocolError;

// Relay-assigned identity, e.g. "3FA9C1". Opaque beyond equality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an id exactly as the relay sent it.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Normalise user input: trimmed, upper-cased, non-empty.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let id = input.trim().to_uppercase();
        if id.is_empty() {
            return Err(ProtocolError::EmptyPeerId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Relay connection status as surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Online,
    Offline { code: Option<u16> },
}

impl ConnectionStatus {
    /// Whether the connection ended with anything other than a normal close.
    pub fn is_abnormal(&self) -> bool {
        matches!(self, Self::Offline { code } if *code != Some(NORMAL_CLOSE_CODE))
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
