//! InMemoryNatsServer - 開発用の NATS transport
//!
//! # 実装詳細
//! - subject ごとの購読を `Vec<Subscriber>` で管理（`*` と `>` の wildcard 対応）
//! - `publish()` は購読者の channel に順番に send する（満杯なら待つ）
//! - 障害注入: 接続拒否・購読拒否・unsubscribe 失敗・close 失敗
//! - 成功した transport 操作を `TransportStats` で数える
//!
//! # 使用例
//! ```ignore
//! let server = InMemoryNatsServer::new();
//! nats::register(&mut session, Arc::new(server.clone()));
//! server.publish(NatsMessage::new("orders.created", b"{}".to_vec())).await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::TransportError;
use crate::ports::{NatsConnection, NatsConnector, NatsMessage, NatsSubscription};

use super::TransportStats;

struct Subscriber {
    id: u64,
    subject: String,
    sink: mpsc::Sender<NatsMessage>,
}

#[derive(Default)]
struct ServerState {
    subscribers: Vec<Subscriber>,
    stats: TransportStats,
    refuse_connections: bool,
    refuse_subscriptions: bool,
    fail_unsubscribe: bool,
    fail_close: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<ServerState>,
    next_id: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// InMemoryNatsServer は同一プロセス内の NATS もどき
///
/// clone は同じ server を共有する。
#[derive(Clone, Default)]
pub struct InMemoryNatsServer {
    inner: Arc<Inner>,
}

impl InMemoryNatsServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.state().refuse_connections = refuse;
    }

    pub fn set_refuse_subscriptions(&self, refuse: bool) {
        self.inner.state().refuse_subscriptions = refuse;
    }

    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.inner.state().fail_unsubscribe = fail;
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.inner.state().fail_close = fail;
    }

    pub fn stats(&self) -> TransportStats {
        self.inner.state().stats
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state().subscribers.len()
    }

    /// Deliver `msg` to every matching subscriber, in subscription order.
    ///
    /// Waits while a subscriber's channel is full. Subscribers whose channel
    /// is closed are skipped. Returns the number of deliveries.
    pub async fn publish(&self, msg: NatsMessage) -> usize {
        let sinks: Vec<mpsc::Sender<NatsMessage>> = {
            let state = self.inner.state();
            state
                .subscribers
                .iter()
                .filter(|s| subject_matches(&s.subject, &msg.subject))
                .map(|s| s.sink.clone())
                .collect()
        };

        let mut delivered = 0;
        for sink in sinks {
            if sink.send(msg.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// NATS subject matching: `*` matches one token, `>` matches one or more
/// trailing tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[async_trait]
impl NatsConnector for InMemoryNatsServer {
    async fn connect(&self, url: &str) -> Result<Box<dyn NatsConnection>, TransportError> {
        let mut state = self.inner.state();
        if state.refuse_connections {
            return Err(format!("connection refused: {url}").into());
        }
        state.stats.connects += 1;
        Ok(Box::new(InMemoryNatsConnection {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemoryNatsConnection {
    inner: Arc<Inner>,
    closed: AtomicBool,
}

#[async_trait]
impl NatsConnection for InMemoryNatsConnection {
    async fn chan_subscribe(
        &self,
        subject: &str,
        sink: mpsc::Sender<NatsMessage>,
    ) -> Result<Box<dyn NatsSubscription>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err("connection closed".into());
        }
        let mut state = self.inner.state();
        if state.refuse_subscriptions {
            return Err(format!("permissions violation for subscription to {subject:?}").into());
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        state.subscribers.push(Subscriber {
            id,
            subject: subject.to_string(),
            sink,
        });
        state.stats.subscribes += 1;
        Ok(Box::new(InMemoryNatsSubscription {
            inner: self.inner.clone(),
            id,
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state();
        if state.fail_close {
            return Err("drain timed out".into());
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            state.stats.closes += 1;
        }
        Ok(())
    }
}

struct InMemoryNatsSubscription {
    inner: Arc<Inner>,
    id: u64,
}

#[async_trait]
impl NatsSubscription for InMemoryNatsSubscription {
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        let mut state = self.inner.state();
        if state.fail_unsubscribe {
            return Err("unsubscribe timed out".into());
        }
        state.subscribers.retain(|s| s.id != self.id);
        state.stats.unsubscribes += 1;
        Ok(())
    }
}
