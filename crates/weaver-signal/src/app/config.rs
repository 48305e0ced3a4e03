//! SessionConfig - ExecutorSession の設定

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signals::base::DEFAULT_MESSAGE_BUFFER;

/// SessionConfig は ExecutorSession 全体の設定
///
/// 全てのフィールドに既定値がある。JSON では省略可能。
///
/// ```json
/// { "event_buffer": 128, "stop_timeout_ms": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the shared outbound event channel.
    pub event_buffer: usize,

    /// Capacity of each signal's inbound message channel.
    pub message_buffer: usize,

    /// Upper bound for a single `stop()`. `None` waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout_ms: Option<u64>,
}

impl SessionConfig {
    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_buffer: 64,
            message_buffer: DEFAULT_MESSAGE_BUFFER,
            stop_timeout_ms: None,
        }
    }
}
