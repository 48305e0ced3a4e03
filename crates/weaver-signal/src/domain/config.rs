//! Config - Signal の宣言的な設定
//!
//! # 設計
//! - 検証は上流で済んでいる前提。ここでは形だけを表す
//! - source 部分は `type` で internally tagged
//!
//! ```json
//! {
//!   "name": "orders",
//!   "source": { "type": "nats", "url": "nats://localhost:4222", "subject": "orders.>" },
//!   "constraints": { "time": { "end": "2030-01-01T00:00:00Z" } }
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constraint::SignalConstraints;
use super::signal_type::SignalType;

/// SignalConfig は job が宣言する Signal 1 つ分の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// ExecutorSession 内で一意
    pub name: String,

    pub source: SourceConfig,

    #[serde(default)]
    pub constraints: SignalConstraints,
}

impl SignalConfig {
    pub fn new(name: impl Into<String>, source: SourceConfig) -> Self {
        Self {
            name: name.into(),
            source,
            constraints: SignalConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: SignalConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// SourceConfig は transport 固有の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Nats(NatsConfig),
    Mqtt(MqttConfig),

    /// 外部 crate の adapter 用。`settings` はそのまま factory に渡る
    Other {
        signal_type: SignalType,
        #[serde(default)]
        settings: serde_json::Value,
    },
}

impl SourceConfig {
    /// 対応する factory の登録キー
    pub fn signal_type(&self) -> SignalType {
        match self {
            SourceConfig::Nats(_) => SignalType::nats(),
            SourceConfig::Mqtt(_) => SignalType::mqtt(),
            SourceConfig::Other { signal_type, .. } => signal_type.clone(),
        }
    }
}

impl fmt::Display for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceConfig::Nats(c) => write!(f, "nats url={} subject={}", c.url, c.subject),
            SourceConfig::Mqtt(c) => write!(
                f,
                "mqtt url={} topic={} qos={}",
                c.url,
                c.topic,
                c.qos.as_u8()
            ),
            SourceConfig::Other {
                signal_type,
                settings,
            } => write!(f, "{signal_type} settings={settings}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub url: String,
    pub topic: String,

    /// 省略時は Signal の名前
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default)]
    pub qos: QoS,
}

/// 購読時に要求する MQTT の配送保証
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}
