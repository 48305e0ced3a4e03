//! MQTT signal (callback-based transport).
//!
//! # フロー
//! 1. `start()`: connect(url, client_id) → subscribe(topic, handler) → listen loop を spawn
//! 2. handler: PUBLISH を bounded inbox（`message_buffer`）に `send().await`。
//!    inbox が満杯なら handler が待ち、client も次の PUBLISH を渡さない
//! 3. loop: [`MqttPublish`] を [`MqttPayload`] に decode して Event にする
//! 4. `stop()`: loop を止める → unsubscribe → disconnect
//!
//! loop が終わると inbox は閉じ、待っていた handler の send は失敗して返る。

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use crate::app::ExecutorSession;
use crate::domain::{
    DecodeError, Event, MqttConfig, QoS, SignalError, SignalType, SourceConfig, SourceMessage,
};
use crate::ports::{
    MqttClient, MqttConnector, MqttPublish, Signal, SignalFactory, message_handler,
};

use super::base::AbstractSignal;

/// Event が運ぶ decode 済みの PUBLISH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttPayload {
    pub topic: String,
    pub data: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl SourceMessage for MqttPayload {
    fn source(&self) -> &str {
        &self.topic
    }

    fn body(&self) -> &[u8] {
        &self.data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `MqttPublish` → `MqttPayload`
///
/// # 失敗条件
/// - topic が UTF-8 でない
/// - topic に wildcard（`+` / `#`）が含まれる
pub fn decode(publish: MqttPublish) -> Result<MqttPayload, DecodeError> {
    let topic = String::from_utf8(publish.topic).map_err(|_| DecodeError::InvalidTopicEncoding)?;
    if topic.contains(['+', '#']) {
        return Err(DecodeError::WildcardInTopic(topic));
    }
    Ok(MqttPayload {
        topic,
        data: publish.payload,
        qos: publish.qos,
        retain: publish.retain,
    })
}

fn decode_to_source(publish: MqttPublish) -> Result<Arc<dyn SourceMessage>, DecodeError> {
    decode(publish).map(|p| Arc::new(p) as Arc<dyn SourceMessage>)
}

pub struct MqttSignal {
    base: AbstractSignal,
    connector: Arc<dyn MqttConnector>,
    client: Option<Box<dyn MqttClient>>,
}

impl MqttSignal {
    pub fn new(base: AbstractSignal, connector: Arc<dyn MqttConnector>) -> Self {
        Self {
            base,
            connector,
            client: None,
        }
    }

    fn source(&self) -> Result<&MqttConfig, SignalError> {
        match &self.base.config().source {
            SourceConfig::Mqtt(config) => Ok(config),
            _ => Err(self.base.source_mismatch(SignalType::mqtt())),
        }
    }

    fn client_id(&self, config: &MqttConfig) -> String {
        config
            .client_id
            .clone()
            .unwrap_or_else(|| self.base.name().to_string())
    }
}

#[async_trait]
impl Signal for MqttSignal {
    fn base(&self) -> &AbstractSignal {
        &self.base
    }

    async fn start(&mut self, events: mpsc::Sender<Event>) -> Result<(), SignalError> {
        self.base.ensure_startable()?;
        let config = self.source()?.clone();
        let client_id = self.client_id(&config);
        info!(
            parent: self.base.span(),
            url = %config.url,
            topic = %config.topic,
            %client_id,
            "starting"
        );

        let client = self
            .connector
            .connect(&config.url, &client_id)
            .await
            .map_err(|source| SignalError::Connection {
                url: config.url.clone(),
                source,
            })?;

        let (inbox_tx, inbox_rx) = self.base.message_channel::<MqttPublish>();
        let handler = message_handler(move |publish: MqttPublish| {
            let inbox_tx = inbox_tx.clone();
            async move {
                if inbox_tx.send(publish).await.is_err() {
                    trace!("mqtt listener is gone, discarding publish");
                }
            }
        });

        if let Err(source) = client.subscribe(&config.topic, config.qos, handler).await {
            if let Err(e) = client.disconnect().await {
                warn!(parent: self.base.span(), error = %e, "disconnect after failed subscribe also failed");
            }
            return Err(SignalError::Subscription {
                target: config.topic,
                source,
            });
        }

        self.client = Some(client);
        self.base.spawn_listener(inbox_rx, events, decode_to_source);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SignalError> {
        if !self.base.stop_listener().await? {
            return Ok(());
        }
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        let target = self.source().map(|c| c.topic.clone()).unwrap_or_default();
        info!(parent: self.base.span(), topic = %target, "stopping");

        let unsubscribed = client.unsubscribe(&target).await;
        let disconnected = client.disconnect().await;
        unsubscribed
            .and(disconnected)
            .map_err(|source| SignalError::Unsubscribe { target, source })
    }
}

pub struct MqttFactory {
    connector: Arc<dyn MqttConnector>,
}

impl MqttFactory {
    pub fn new(connector: Arc<dyn MqttConnector>) -> Self {
        Self { connector }
    }
}

impl SignalFactory for MqttFactory {
    fn create(&self, base: AbstractSignal) -> Box<dyn Signal> {
        info!(parent: base.span(), raw = %base.config().source, "creating signal");
        Box::new(MqttSignal::new(base, self.connector.clone()))
    }
}

/// MQTT factory を [`SignalType::MQTT`] で登録
pub fn register(session: &mut ExecutorSession, connector: Arc<dyn MqttConnector>) {
    session.add_factory(SignalType::mqtt(), MqttFactory::new(connector));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SignalConfig, SignalState};
    use crate::impls::InMemoryMqttBroker;
    use crate::signals::base::SignalContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn mqtt_signal(broker: &InMemoryMqttBroker, topic: &str) -> (MqttSignal, SignalContext) {
        mqtt_signal_with(broker, topic, SignalContext::default())
    }

    fn mqtt_signal_with(
        broker: &InMemoryMqttBroker,
        topic: &str,
        context: SignalContext,
    ) -> (MqttSignal, SignalContext) {
        let config = SignalConfig::new(
            "sensors",
            SourceConfig::Mqtt(MqttConfig {
                url: "tcp://in-memory:1883".to_string(),
                topic: topic.to_string(),
                client_id: None,
                qos: QoS::AtLeastOnce,
            }),
        );
        let base = AbstractSignal::new(SignalType::mqtt(), config, context.clone());
        (MqttSignal::new(base, Arc::new(broker.clone())), context)
    }

    async fn recv_topic(rx: &mut mpsc::Receiver<Event>) -> String {
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        event.payload_as::<MqttPayload>().unwrap().topic.clone()
    }

    #[test]
    fn decode_checks_topic_name() {
        let ok = decode(MqttPublish::new("sensors/kitchen", b"21.5".to_vec())).unwrap();
        assert_eq!(ok.topic, "sensors/kitchen");
        assert_eq!(ok.data, b"21.5");

        assert_eq!(
            decode(MqttPublish::new(vec![0xff, 0xfe], b"x".to_vec())),
            Err(DecodeError::InvalidTopicEncoding)
        );
        assert!(matches!(
            decode(MqttPublish::new("sensors/+", b"x".to_vec())),
            Err(DecodeError::WildcardInTopic(_))
        ));
    }

    #[tokio::test]
    async fn forwards_publishes_from_the_callback_in_order() {
        let broker = InMemoryMqttBroker::new();
        let (mut signal, _) = mqtt_signal(&broker, "sensors/#");
        let (events_tx, mut events_rx) = mpsc::channel(16);
        signal.start(events_tx).await.unwrap();

        for room in ["a", "b", "c"] {
            broker
                .publish(MqttPublish::new(format!("sensors/{room}"), b"1".to_vec()))
                .await;
        }
        broker.publish(MqttPublish::new("other/x", b"1".to_vec())).await;

        assert_eq!(recv_topic(&mut events_rx).await, "sensors/a");
        assert_eq!(recv_topic(&mut events_rx).await, "sensors/b");
        assert_eq!(recv_topic(&mut events_rx).await, "sensors/c");

        signal.stop().await.unwrap();
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn client_id_defaults_to_signal_name() {
        let broker = InMemoryMqttBroker::new();
        let (mut signal, _) = mqtt_signal(&broker, "sensors/#");
        let (events_tx, _events_rx) = mpsc::channel(1);
        signal.start(events_tx).await.unwrap();

        assert_eq!(broker.connected_clients(), vec!["sensors".to_string()]);
        signal.stop().await.unwrap();
        assert!(broker.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn undecodable_topic_is_dropped() {
        let broker = InMemoryMqttBroker::new();
        let (mut signal, context) = mqtt_signal(&broker, "#");
        let (events_tx, mut events_rx) = mpsc::channel(16);
        signal.start(events_tx).await.unwrap();

        broker.publish(MqttPublish::new("sensors/a", b"1".to_vec())).await;
        broker.publish(MqttPublish::new(vec![b's', 0xff], b"2".to_vec())).await;
        broker.publish(MqttPublish::new("sensors/c", b"3".to_vec())).await;

        assert_eq!(recv_topic(&mut events_rx).await, "sensors/a");
        assert_eq!(recv_topic(&mut events_rx).await, "sensors/c");
        assert_eq!(context.loops().count(), 1);

        signal.stop().await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_failure_disconnects() {
        let broker = InMemoryMqttBroker::new();
        broker.set_refuse_subscriptions(true);
        let (mut signal, _) = mqtt_signal(&broker, "sensors/#");
        let (events_tx, _events_rx) = mpsc::channel(1);

        let err = signal.start(events_tx).await.unwrap_err();

        assert!(matches!(err, SignalError::Subscription { .. }));
        assert_eq!(signal.state(), SignalState::Created);
        assert!(broker.connected_clients().is_empty());
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connection_error() {
        let broker = InMemoryMqttBroker::new();
        broker.set_refuse_connections(true);
        let (mut signal, _) = mqtt_signal(&broker, "sensors/#");
        let (events_tx, _events_rx) = mpsc::channel(1);

        assert!(matches!(
            signal.start(events_tx).await,
            Err(SignalError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn publishes_after_stop_are_discarded() {
        let broker = InMemoryMqttBroker::new();
        let (mut signal, context) = mqtt_signal(&broker, "sensors/#");
        let (events_tx, mut events_rx) = mpsc::channel(16);
        signal.start(events_tx).await.unwrap();

        broker.set_fail_unsubscribe(true);
        let err = signal.stop().await.unwrap_err();
        assert!(matches!(err, SignalError::Unsubscribe { .. }));
        assert_eq!(context.loops().count(), 0);

        // unsubscribe が失敗しても loop は止まっている
        broker.publish(MqttPublish::new("sensors/a", b"1".to_vec())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stalled_consumer_blocks_the_client() {
        let broker = InMemoryMqttBroker::new();
        let context = SignalContext::default().with_message_buffer(4);
        let (mut signal, _) = mqtt_signal_with(&broker, "sensors/#", context);
        // 誰も読まない outbound（capacity 1）
        let (events_tx, _events_rx) = mpsc::channel(1);
        signal.start(events_tx).await.unwrap();

        let accepted = Arc::new(AtomicUsize::new(0));
        let publisher = {
            let broker = broker.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                for i in 0..1000 {
                    broker
                        .publish(MqttPublish::new("sensors/a", format!("{i}").into_bytes()))
                        .await;
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // outbound 1 + loop が抱える 1 + inbox 4 + 送信中の 1
        let stalled_at = accepted.load(Ordering::SeqCst);
        assert!(stalled_at <= 7, "client was not held back: {stalled_at} accepted");
        assert!(!publisher.is_finished());

        // loop が止まると待っていた handler は解放される
        signal.stop().await.unwrap();
        timeout(WAIT, publisher).await.unwrap().unwrap();
    }
}
