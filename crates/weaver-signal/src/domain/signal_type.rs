//! SignalType - Factory を引くための type tag

use serde::{Deserialize, Serialize};
use std::fmt;

/// SignalType は Factory の登録キー
///
/// 組み込みの adapter は `"NATS"` と `"MQTT"`。
/// それ以外の文字列も自由に使える（外部 crate の adapter 用）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalType(String);

impl SignalType {
    pub const NATS: &'static str = "NATS";
    pub const MQTT: &'static str = "MQTT";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn nats() -> Self {
        Self::new(Self::NATS)
    }

    pub fn mqtt() -> Self {
        Self::new(Self::MQTT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SignalType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SignalType {
    fn from(value: String) -> Self {
        Self(value)
    }
}
