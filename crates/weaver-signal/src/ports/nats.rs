//! NATS transport port - channel 型の配送
//!
//! # 責務
//! - wire client は crate の外にある
//! - NATS signal が必要とするのは、subject を購読して全メッセージを
//!   Signal 所有の `mpsc::Sender` に送る connection だけ
//! - `close()` は未配送分を流し切ってから閉じる（NATS の drain 相当）

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::TransportError;

/// client から届いた、decode 前のメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsMessage {
    pub subject: String,
    pub reply: Option<String>,
    /// Raw header block (`NATS/1.0\r\nKey: Value\r\n...`), if present.
    pub headers: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl NatsMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: None,
            payload: payload.into(),
        }
    }

    pub fn with_headers(mut self, headers: impl Into<Vec<u8>>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

#[async_trait]
pub trait NatsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn NatsConnection>, TransportError>;
}

#[async_trait]
pub trait NatsConnection: Send + Sync {
    /// Deliver every message on `subject` into `sink`.
    ///
    /// The client must stop writing once `sink` is closed.
    async fn chan_subscribe(
        &self,
        subject: &str,
        sink: mpsc::Sender<NatsMessage>,
    ) -> Result<Box<dyn NatsSubscription>, TransportError>;

    /// Drain the connection: flush pending deliveries, then close it.
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait NatsSubscription: Send + Sync {
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}
