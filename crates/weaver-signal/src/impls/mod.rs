//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryNatsServer**: channel-based transport のもどき
//! - **InMemoryMqttBroker**: callback-based transport のもどき
//!
//! # 本番用実装
//! 本物の wire client を包む adapter は別クレートに置く想定。

pub mod inmem_mqtt;
pub mod inmem_nats;

pub use self::inmem_mqtt::InMemoryMqttBroker;
pub use self::inmem_nats::InMemoryNatsServer;

/// Counts of successful transport operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportStats {
    pub connects: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
    /// NATS `close()` / MQTT `disconnect()`
    pub closes: usize,
}
