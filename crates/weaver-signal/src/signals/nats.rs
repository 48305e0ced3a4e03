//! NATS signal (channel-based transport).
//!
//! # フロー
//! 1. `start()`: connect(url) → chan_subscribe(subject, inbox_tx) → listen loop を spawn
//! 2. loop: [`NatsMessage`] を [`NatsPayload`] に decode して Event にする
//! 3. `stop()`: loop を止める → unsubscribe → close（drain してから閉じる）
//!
//! connect 失敗は `Connection`、subscribe 失敗は `Subscription`（接続は閉じる）。

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::ExecutorSession;
use crate::domain::{
    DecodeError, Event, NatsConfig, SignalError, SignalType, SourceConfig, SourceMessage,
};
use crate::ports::{NatsConnection, NatsConnector, NatsMessage, NatsSubscription, Signal, SignalFactory};

use super::base::AbstractSignal;

/// Event が運ぶ decode 済みの NATS メッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsPayload {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: Vec<(String, String)>,
    pub data: Vec<u8>,
}

impl NatsPayload {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl SourceMessage for NatsPayload {
    fn source(&self) -> &str {
        &self.subject
    }

    fn body(&self) -> &[u8] {
        &self.data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `NatsMessage` → `NatsPayload`
///
/// # 失敗条件
/// - subject が空
/// - header block が `NATS/1.0` で始まらない、または `Key: Value` 形式でない行がある
pub fn decode(msg: NatsMessage) -> Result<NatsPayload, DecodeError> {
    if msg.subject.is_empty() {
        return Err(DecodeError::EmptySubject);
    }
    let headers = match msg.headers.as_deref() {
        Some(raw) => parse_headers(raw)?,
        None => Vec::new(),
    };
    Ok(NatsPayload {
        subject: msg.subject,
        reply: msg.reply,
        headers,
        data: msg.payload,
    })
}

fn parse_headers(raw: &[u8]) -> Result<Vec<(String, String)>, DecodeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| DecodeError::MalformedHeaders("header block is not UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");

    let version = lines.next().unwrap_or_default();
    if !version.starts_with("NATS/1.0") {
        return Err(DecodeError::MalformedHeaders(format!(
            "unexpected version line {version:?}"
        )));
    }

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| DecodeError::MalformedHeaders(format!("missing ':' in {line:?}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DecodeError::MalformedHeaders(format!("empty key in {line:?}")));
        }
        headers.push((key.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

fn decode_to_source(msg: NatsMessage) -> Result<Arc<dyn SourceMessage>, DecodeError> {
    decode(msg).map(|p| Arc::new(p) as Arc<dyn SourceMessage>)
}

struct Subscribed {
    connection: Box<dyn NatsConnection>,
    subscription: Box<dyn NatsSubscription>,
}

pub struct NatsSignal {
    base: AbstractSignal,
    connector: Arc<dyn NatsConnector>,
    subscribed: Option<Subscribed>,
}

impl NatsSignal {
    pub fn new(base: AbstractSignal, connector: Arc<dyn NatsConnector>) -> Self {
        Self {
            base,
            connector,
            subscribed: None,
        }
    }

    fn source(&self) -> Result<&NatsConfig, SignalError> {
        match &self.base.config().source {
            SourceConfig::Nats(config) => Ok(config),
            _ => Err(self.base.source_mismatch(SignalType::nats())),
        }
    }
}

#[async_trait]
impl Signal for NatsSignal {
    fn base(&self) -> &AbstractSignal {
        &self.base
    }

    async fn start(&mut self, events: mpsc::Sender<Event>) -> Result<(), SignalError> {
        self.base.ensure_startable()?;
        let NatsConfig { url, subject } = self.source()?.clone();
        info!(parent: self.base.span(), %url, %subject, "starting");

        let connection = self
            .connector
            .connect(&url)
            .await
            .map_err(|source| SignalError::Connection {
                url: url.clone(),
                source,
            })?;

        let (inbox_tx, inbox_rx) = self.base.message_channel::<NatsMessage>();
        let subscription = match connection.chan_subscribe(&subject, inbox_tx).await {
            Ok(subscription) => subscription,
            Err(source) => {
                if let Err(e) = connection.close().await {
                    warn!(parent: self.base.span(), error = %e, "close after failed subscribe also failed");
                }
                return Err(SignalError::Subscription {
                    target: subject,
                    source,
                });
            }
        };

        self.subscribed = Some(Subscribed {
            connection,
            subscription,
        });
        self.base.spawn_listener(inbox_rx, events, decode_to_source);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SignalError> {
        if !self.base.stop_listener().await? {
            return Ok(());
        }
        let Some(Subscribed {
            connection,
            subscription,
        }) = self.subscribed.take()
        else {
            return Ok(());
        };

        let target = self
            .source()
            .map(|c| c.subject.clone())
            .unwrap_or_default();
        info!(parent: self.base.span(), subject = %target, "stopping");

        let unsubscribed = subscription.unsubscribe().await;
        let closed = connection.close().await;
        unsubscribed
            .and(closed)
            .map_err(|source| SignalError::Unsubscribe { target, source })
    }
}

/// `connector` 経由で接続する [`NatsSignal`] を作る
pub struct NatsFactory {
    connector: Arc<dyn NatsConnector>,
}

impl NatsFactory {
    pub fn new(connector: Arc<dyn NatsConnector>) -> Self {
        Self { connector }
    }
}

impl SignalFactory for NatsFactory {
    fn create(&self, base: AbstractSignal) -> Box<dyn Signal> {
        info!(parent: base.span(), raw = %base.config().source, "creating signal");
        Box::new(NatsSignal::new(base, self.connector.clone()))
    }
}

/// NATS factory を [`SignalType::NATS`] で登録
pub fn register(session: &mut ExecutorSession, connector: Arc<dyn NatsConnector>) {
    session.add_factory(SignalType::nats(), NatsFactory::new(connector));
}
