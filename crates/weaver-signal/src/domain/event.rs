//! Event - transport に依存しない内部イベント
//!
//! Event は Signal の listen loop でのみ作られ、constraint check の結果を
//! 添付した後は変更されない。公開 API は getter だけ。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::constraint::ConstraintViolation;
use super::ids::EventId;
use super::signal_type::SignalType;

/// SourceMessage は transport 固有メッセージへの不透明なハンドル
///
/// adapter ごとの decode 結果（`NatsPayload`, `MqttPayload` など）が実装する。
/// 具体型が必要な consumer は [`Event::payload_as`] でダウンキャストする。
pub trait SourceMessage: fmt::Debug + Send + Sync + 'static {
    /// subject / topic
    fn source(&self) -> &str;

    fn body(&self) -> &[u8];

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    signal: String,
    signal_type: SignalType,
    timestamp: DateTime<Utc>,
    payload: Arc<dyn SourceMessage>,
    error: Option<ConstraintViolation>,
}

impl Event {
    pub(crate) fn new(
        id: EventId,
        signal: String,
        signal_type: SignalType,
        timestamp: DateTime<Utc>,
        payload: Arc<dyn SourceMessage>,
        error: Option<ConstraintViolation>,
    ) -> Self {
        Self {
            id,
            signal,
            signal_type,
            timestamp,
            payload,
            error,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    /// Name of the signal that emitted this event.
    pub fn signal(&self) -> &str {
        &self.signal
    }

    pub fn signal_type(&self) -> &SignalType {
        &self.signal_type
    }

    /// UTC instant of receipt.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Arc<dyn SourceMessage> {
        &self.payload
    }

    pub fn payload_as<T: SourceMessage>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    pub fn error(&self) -> Option<&ConstraintViolation> {
        self.error.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}
