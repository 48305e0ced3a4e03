//! InMemoryMqttBroker - 開発用の MQTT transport
//!
//! # 実装詳細
//! - 購読は (client_id, topic filter, handler) の組で保持
//! - `publish()` は topic filter に合う handler を順に呼んで完了を待つ（`+` / `#` 対応）
//! - handler はロックの外で呼ぶ。handler が待つ間は publish も待つ
//! - 障害注入と `TransportStats` は InMemoryNatsServer と同じ

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::{QoS, TransportError};
use crate::ports::{MessageHandler, MqttClient, MqttConnector, MqttPublish};

use super::TransportStats;

struct Subscription {
    client_id: String,
    filter: String,
    handler: MessageHandler,
}

#[derive(Default)]
struct BrokerState {
    clients: BTreeSet<String>,
    subscriptions: Vec<Subscription>,
    stats: TransportStats,
    refuse_connections: bool,
    refuse_subscriptions: bool,
    fail_unsubscribe: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryMqttBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryMqttBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    pub fn set_refuse_subscriptions(&self, refuse: bool) {
        self.state().refuse_subscriptions = refuse;
    }

    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.state().fail_unsubscribe = fail;
    }

    pub fn stats(&self) -> TransportStats {
        self.state().stats
    }

    pub fn connected_clients(&self) -> Vec<String> {
        self.state().clients.iter().cloned().collect()
    }

    /// Invoke every handler whose filter matches the topic and wait for each.
    ///
    /// Non-UTF-8 topics are matched lossily so they still reach the
    /// subscriber, which is expected to reject them. Returns the number of
    /// handlers called.
    pub async fn publish(&self, publish: MqttPublish) -> usize {
        let topic = String::from_utf8_lossy(&publish.topic).into_owned();
        let handlers: Vec<MessageHandler> = {
            let state = self.state();
            state
                .subscriptions
                .iter()
                .filter(|s| topic_matches(&s.filter, &topic))
                .map(|s| s.handler.clone())
                .collect()
        };

        for handler in &handlers {
            handler(publish.clone()).await;
        }
        handlers.len()
    }
}

/// MQTT topic filter matching: `+` matches one level, `#` matches the
/// remaining levels (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[async_trait]
impl MqttConnector for InMemoryMqttBroker {
    async fn connect(
        &self,
        url: &str,
        client_id: &str,
    ) -> Result<Box<dyn MqttClient>, TransportError> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(format!("broker at {url} is unreachable").into());
        }
        if !state.clients.insert(client_id.to_string()) {
            return Err(format!("client id {client_id:?} is already connected").into());
        }
        state.stats.connects += 1;
        Ok(Box::new(InMemoryMqttClient {
            broker: self.clone(),
            client_id: client_id.to_string(),
        }))
    }
}

struct InMemoryMqttClient {
    broker: InMemoryMqttBroker,
    client_id: String,
}

#[async_trait]
impl MqttClient for InMemoryMqttClient {
    async fn subscribe(
        &self,
        topic: &str,
        _qos: QoS,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        if state.refuse_subscriptions {
            return Err(format!("SUBACK failure for {topic:?}").into());
        }
        state.subscriptions.push(Subscription {
            client_id: self.client_id.clone(),
            filter: topic.to_string(),
            handler,
        });
        state.stats.subscribes += 1;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        if state.fail_unsubscribe {
            return Err("UNSUBACK not received".into());
        }
        state
            .subscriptions
            .retain(|s| !(s.client_id == self.client_id && s.filter == topic));
        state.stats.unsubscribes += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.subscriptions.retain(|s| s.client_id != self.client_id);
        if state.clients.remove(&self.client_id) {
            state.stats.closes += 1;
        }
        Ok(())
    }
}
