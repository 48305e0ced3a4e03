//! weaver-signal
//!
//! Signal ingestion for the Weaver job engine: pluggable adapters subscribe to
//! an external source (NATS, MQTT, ...) and turn every inbound message into a
//! transport-agnostic [`Event`](domain::Event) on one shared channel.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, signal_type, event, constraint, config, state, errors）
//! - **ports**: 抽象化レイヤー（Signal, SignalFactory, NATS / MQTT の wire client, Clock, IdGenerator）
//! - **signals**: AbstractSignal（listen loop）と NATS / MQTT adapter
//! - **app**: ExecutorSession, SessionBuilder, FactoryRegistry, SessionConfig
//! - **impls**: 実装（InMemoryNatsServer, InMemoryMqttBroker など開発用）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod signals;
