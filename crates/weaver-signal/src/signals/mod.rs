//! Signals - transport adapter と共通の基盤
//!
//! - **base**: AbstractSignal（listen loop, lifecycle, Event の生成）
//! - **nats**: channel-based adapter
//! - **mqtt**: callback-based adapter

pub mod base;
pub mod mqtt;
pub mod nats;

pub use self::base::{AbstractSignal, ActiveLoops, Inbox, SignalContext};
pub use self::mqtt::{MqttFactory, MqttPayload, MqttSignal};
pub use self::nats::{NatsFactory, NatsPayload, NatsSignal};
