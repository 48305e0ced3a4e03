//! MQTT transport port - callback 型の配送
//!
//! # 責務
//! - wire client は crate の外にある。client は受け取った PUBLISH ごとに
//!   [`MessageHandler`] を呼ぶ
//! - handler は future を返す。client は完了を待ってから次の PUBLISH を渡す
//!   （Signal の inbox が詰まれば client も止まる = back-pressure）
//!
//! MQTT signal は inbox に送るだけの handler を登録するので、
//! listen loop は channel 型 transport と同じ形になる。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{QoS, TransportError};

/// 受信した PUBLISH。topic は生の bytes のまま（検証は decode で行う）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttPublish {
    pub topic: Vec<u8>,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MqttPublish {
    pub fn new(topic: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

/// [`MessageHandler`] が返す future
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// client が PUBLISH ごとに呼び、返った future を await する
pub type MessageHandler = Arc<dyn Fn(MqttPublish) -> HandlerFuture + Send + Sync>;

/// async closure から [`MessageHandler`] を作る
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(MqttPublish) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |publish| -> HandlerFuture { Box::pin(f(publish)) })
}

#[async_trait]
pub trait MqttConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        client_id: &str,
    ) -> Result<Box<dyn MqttClient>, TransportError>;
}

#[async_trait]
pub trait MqttClient: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
