//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! wire client（NATS, MQTT など）や時刻・ID 生成は trait の向こう側にあり、
//! core はそれぞれの実装の詳細を知りません。

pub mod clock;
pub mod id_generator;
pub mod mqtt;
pub mod nats;
pub mod signal;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::mqtt::{
    HandlerFuture, MessageHandler, MqttClient, MqttConnector, MqttPublish, message_handler,
};
pub use self::nats::{NatsConnection, NatsConnector, NatsMessage, NatsSubscription};
pub use self::signal::{Signal, SignalFactory};
