//! ExecutorSession - Signal の生成と実行を束ねる
//!
//! # 責務
//! - SignalType → Factory の登録（[`FactoryRegistry`]）
//! - 全 Signal が共有する outbound channel の所有
//! - 名前付きで active な Signal の管理（activate / deactivate / shutdown）
//!
//! # 使用例
//! ```ignore
//! let (mut session, mut events) = ExecutorSession::new(SessionConfig::default());
//! nats::register(&mut session, Arc::new(server));
//! session.activate(config).await?;
//! while let Some(event) = events.recv().await { ... }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{Span, info, warn};

use crate::domain::{Event, SessionId, SignalConfig, SignalError, SignalType};
use crate::ports::{Clock, Signal, SignalFactory, SystemClock};
use crate::signals::{AbstractSignal, SignalContext};

use super::config::SessionConfig;
use super::registry::FactoryRegistry;

pub struct ExecutorSession {
    id: SessionId,
    config: SessionConfig,
    registry: FactoryRegistry,
    context: SignalContext,
    events: mpsc::Sender<Event>,
    active: BTreeMap<String, Box<dyn Signal>>,
    span: Span,
}

impl ExecutorSession {
    /// Create a session and the receiving end of its event channel.
    pub fn new(config: SessionConfig) -> (Self, mpsc::Receiver<Event>) {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<Event>) {
        let context = SignalContext::new(clock).with_message_buffer(config.message_buffer);
        let id = context.ids().generate_session_id();
        let span = tracing::info_span!("session", session_id = %id);
        let (events, rx) = mpsc::channel(config.event_buffer.max(1));

        let session = Self {
            id,
            config,
            registry: FactoryRegistry::new(),
            context,
            events,
            active: BTreeMap::new(),
            span,
        };
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register `factory` under `signal_type`. A later registration for the
    /// same tag replaces the earlier one.
    pub fn add_factory(
        &mut self,
        signal_type: impl Into<SignalType>,
        factory: impl SignalFactory + 'static,
    ) {
        self.add_shared_factory(signal_type.into(), Arc::new(factory));
    }

    pub(crate) fn add_shared_factory(
        &mut self,
        signal_type: SignalType,
        factory: Arc<dyn SignalFactory>,
    ) {
        if self.registry.insert(signal_type.clone(), factory).is_some() {
            warn!(parent: &self.span, %signal_type, "replacing previously registered factory");
        } else {
            info!(parent: &self.span, %signal_type, "factory registered");
        }
    }

    pub fn registered_types(&self) -> Vec<SignalType> {
        self.registry.registered_types()
    }

    /// Build an unstarted signal through the factory registered for
    /// `signal_type`. The factory performs no I/O.
    pub fn create_signal(
        &self,
        signal_type: &SignalType,
        config: SignalConfig,
    ) -> Result<Box<dyn Signal>, SignalError> {
        let factory = self
            .registry
            .get(signal_type)
            .ok_or_else(|| SignalError::UnknownSignalType(signal_type.clone()))?;
        let base = AbstractSignal::new(signal_type.clone(), config, self.context.clone());
        Ok(factory.create(base))
    }

    /// Sender half of the shared outbound channel, for driving signals
    /// created with [`create_signal`](Self::create_signal) by hand.
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    /// Create, start and keep a signal under its configured name.
    ///
    /// The signal type comes from the source configuration. A signal that
    /// fails to start is discarded.
    pub async fn activate(&mut self, config: SignalConfig) -> Result<(), SignalError> {
        if self.active.contains_key(&config.name) {
            return Err(SignalError::DuplicateSignal(config.name));
        }
        let name = config.name.clone();
        let signal_type = config.source.signal_type();

        let mut signal = self.create_signal(&signal_type, config)?;
        if let Err(err) = signal.start(self.events.clone()).await {
            warn!(parent: &self.span, signal = %name, error = %err, "signal failed to start");
            return Err(err);
        }

        info!(parent: &self.span, signal = %name, %signal_type, "signal activated");
        self.active.insert(name, signal);
        Ok(())
    }

    /// Stop and forget the named signal.
    ///
    /// The signal is removed even when its `stop()` fails.
    pub async fn deactivate(&mut self, name: &str) -> Result<(), SignalError> {
        let signal = self
            .active
            .remove(name)
            .ok_or_else(|| SignalError::SignalNotActive(name.to_string()))?;
        Self::stop_signal(signal, self.config.stop_timeout()).await?;
        info!(parent: &self.span, signal = %name, "signal deactivated");
        Ok(())
    }

    /// Stop every active signal, in name order. Returns the failures.
    pub async fn shutdown(mut self) -> Vec<SignalError> {
        let active = std::mem::take(&mut self.active);
        info!(parent: &self.span, signals = active.len(), "shutting down");

        let limit = self.config.stop_timeout();
        let mut errors = Vec::new();
        for (name, signal) in active {
            if let Err(err) = Self::stop_signal(signal, limit).await {
                warn!(parent: &self.span, signal = %name, error = %err, "signal failed to stop");
                errors.push(err);
            }
        }
        errors
    }

    pub fn active_signals(&self) -> Vec<&str> {
        self.active.keys().map(String::as_str).collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Number of listen loops currently running for signals of this session,
    /// including ones created with `create_signal`.
    pub fn active_loops(&self) -> usize {
        self.context.loops().count()
    }

    /// `limit` を超えたら Signal を drop する（loop は drop で cancel される）
    ///
    /// `&self` を await の向こうに持ち越さないよう associated fn にしてある。
    async fn stop_signal(
        mut signal: Box<dyn Signal>,
        limit: Option<Duration>,
    ) -> Result<(), SignalError> {
        let Some(limit) = limit else {
            return signal.stop().await;
        };
        let name = signal.name().to_string();
        tokio::time::timeout(limit, signal.stop())
            .await
            .map_err(|_| SignalError::StopTimeout {
                signal: name,
                timeout: limit,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DecodeError, NatsConfig, SignalState, SourceConfig, SourceMessage};
    use crate::impls::InMemoryNatsServer;
    use crate::ports::NatsMessage;
    use crate::signals::nats;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Debug)]
    struct Byte(u8);

    impl SourceMessage for Byte {
        fn source(&self) -> &str {
            "stub"
        }

        fn body(&self) -> &[u8] {
            std::slice::from_ref(&self.0)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    type Feeds = Arc<Mutex<Vec<mpsc::Sender<u8>>>>;

    /// listen loop を持つだけの Signal。start 時の inbox sender を `feeds` に置く
    struct StubSignal {
        base: AbstractSignal,
        feeds: Feeds,
    }

    #[async_trait]
    impl Signal for StubSignal {
        fn base(&self) -> &AbstractSignal {
            &self.base
        }

        async fn start(&mut self, events: mpsc::Sender<Event>) -> Result<(), SignalError> {
            self.base.ensure_startable()?;
            let (tx, rx) = self.base.message_channel::<u8>();
            self.feeds.lock().unwrap().push(tx);
            self.base.spawn_listener(rx, events, |b: u8| {
                Ok::<Arc<dyn SourceMessage>, DecodeError>(Arc::new(Byte(b)))
            });
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), SignalError> {
            self.base.stop_listener().await.map(|_| ())
        }
    }

    #[derive(Default)]
    struct StubFactory {
        created: Arc<AtomicUsize>,
        feeds: Feeds,
    }

    impl StubFactory {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let factory = Self::default();
            let created = factory.created.clone();
            (factory, created)
        }
    }

    impl SignalFactory for StubFactory {
        fn create(&self, base: AbstractSignal) -> Box<dyn Signal> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(StubSignal {
                base,
                feeds: self.feeds.clone(),
            })
        }
    }

    /// stop() が返らない Signal
    struct StuckSignal {
        base: AbstractSignal,
    }

    #[async_trait]
    impl Signal for StuckSignal {
        fn base(&self) -> &AbstractSignal {
            &self.base
        }

        async fn start(&mut self, _events: mpsc::Sender<Event>) -> Result<(), SignalError> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), SignalError> {
            std::future::pending().await
        }
    }

    struct StuckFactory;

    impl SignalFactory for StuckFactory {
        fn create(&self, base: AbstractSignal) -> Box<dyn Signal> {
            Box::new(StuckSignal { base })
        }
    }

    fn other(name: &str, tag: &str) -> SignalConfig {
        SignalConfig::new(
            name,
            SourceConfig::Other {
                signal_type: SignalType::new(tag),
                settings: serde_json::Value::Null,
            },
        )
    }

    fn nats_config(name: &str, subject: &str) -> SignalConfig {
        SignalConfig::new(
            name,
            SourceConfig::Nats(NatsConfig {
                url: "nats://in-memory".to_string(),
                subject: subject.to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn unknown_type_is_rejected_and_registered_type_starts() {
        let (mut session, _events) = ExecutorSession::new(SessionConfig::default());
        let (a, _) = StubFactory::new();
        let (b, _) = StubFactory::new();
        session.add_factory("A", a);
        session.add_factory("B", b);

        let missing = session.create_signal(&SignalType::new("C"), other("c", "C"));
        assert!(matches!(
            missing,
            Err(SignalError::UnknownSignalType(t)) if t == SignalType::new("C")
        ));

        let mut signal = session
            .create_signal(&SignalType::new("A"), other("a", "A"))
            .unwrap();
        assert_eq!(signal.state(), SignalState::Created);
        signal.start(session.event_sender()).await.unwrap();
        assert_eq!(signal.state(), SignalState::Started);
        signal.stop().await.unwrap();
    }

    #[tokio::test]
    async fn loop_gauge_returns_to_zero_after_stop() {
        let (mut session, mut events) = ExecutorSession::new(SessionConfig::default());
        let factory = StubFactory::default();
        let feeds = factory.feeds.clone();
        session.add_factory("A", factory);

        let mut signal = session
            .create_signal(&SignalType::new("A"), other("a", "A"))
            .unwrap();
        signal.start(session.event_sender()).await.unwrap();
        assert_eq!(session.active_loops(), 1);

        let feed = feeds.lock().unwrap()[0].clone();
        feed.send(42).await.unwrap();
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.signal(), "a");
        assert_eq!(event.signal_type(), &SignalType::new("A"));
        assert_eq!(event.payload().body(), &[42]);

        signal.stop().await.unwrap();
        assert_eq!(session.active_loops(), 0);
    }

    #[tokio::test]
    async fn later_registration_wins() {
        let (mut session, _events) = ExecutorSession::new(SessionConfig::default());
        let (first, first_created) = StubFactory::new();
        let (second, second_created) = StubFactory::new();
        session.add_factory("A", first);
        session.add_factory("A", second);

        session
            .create_signal(&SignalType::new("A"), other("a", "A"))
            .unwrap();

        assert_eq!(first_created.load(Ordering::SeqCst), 0);
        assert_eq!(second_created.load(Ordering::SeqCst), 1);
        assert_eq!(session.registered_types(), vec![SignalType::new("A")]);
    }

    #[tokio::test]
    async fn activate_publish_deactivate_with_nats() {
        let server = InMemoryNatsServer::new();
        let (mut session, mut events) = ExecutorSession::new(SessionConfig::default());
        nats::register(&mut session, Arc::new(server.clone()));

        session.activate(nats_config("orders", "orders.*")).await.unwrap();
        assert_eq!(session.active_signals(), vec!["orders"]);
        assert_eq!(session.active_loops(), 1);

        server
            .publish(NatsMessage::new("orders.created", b"{}".to_vec()))
            .await;
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.signal(), "orders");
        assert_eq!(event.payload().source(), "orders.created");

        session.deactivate("orders").await.unwrap();
        assert!(session.active_signals().is_empty());
        assert_eq!(session.active_loops(), 0);
        assert_eq!(server.subscriber_count(), 0);

        assert!(matches!(
            session.deactivate("orders").await,
            Err(SignalError::SignalNotActive(name)) if name == "orders"
        ));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_without_connecting_again() {
        let server = InMemoryNatsServer::new();
        let (mut session, _events) = ExecutorSession::new(SessionConfig::default());
        nats::register(&mut session, Arc::new(server.clone()));

        session.activate(nats_config("orders", "orders")).await.unwrap();
        let err = session
            .activate(nats_config("orders", "payments"))
            .await
            .unwrap_err();

        assert!(matches!(err, SignalError::DuplicateSignal(name) if name == "orders"));
        assert_eq!(server.stats().connects, 1);
        assert!(session.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn failed_start_is_not_kept() {
        let server = InMemoryNatsServer::new();
        server.set_refuse_connections(true);
        let (mut session, _events) = ExecutorSession::new(SessionConfig::default());
        nats::register(&mut session, Arc::new(server.clone()));

        let err = session.activate(nats_config("orders", "orders")).await.unwrap_err();

        assert!(matches!(err, SignalError::Connection { .. }));
        assert!(!session.is_active("orders"));
        assert_eq!(session.active_loops(), 0);
    }

    #[tokio::test]
    async fn activate_with_unregistered_source_type_fails() {
        let (mut session, _events) = ExecutorSession::new(SessionConfig::default());

        let err = session.activate(nats_config("orders", "orders")).await.unwrap_err();

        assert!(matches!(err, SignalError::UnknownSignalType(t) if t == SignalType::nats()));
    }

    #[tokio::test]
    async fn shutdown_stops_every_signal() {
        let server = InMemoryNatsServer::new();
        let (mut session, _events) = ExecutorSession::new(SessionConfig::default());
        nats::register(&mut session, Arc::new(server.clone()));

        session.activate(nats_config("orders", "orders")).await.unwrap();
        session.activate(nats_config("payments", "payments")).await.unwrap();
        assert_eq!(server.subscriber_count(), 2);

        let errors = session.shutdown().await;

        assert!(errors.is_empty());
        assert_eq!(server.subscriber_count(), 0);
        assert_eq!(server.stats().closes, 2);
    }

    #[tokio::test]
    async fn stop_timeout_is_reported() {
        let config = SessionConfig::default().with_stop_timeout(Duration::from_millis(20));
        let (mut session, _events) = ExecutorSession::new(config);
        session.add_factory("STUCK", StuckFactory);

        session.activate(other("stuck", "STUCK")).await.unwrap();
        let err = timeout(WAIT, session.deactivate("stuck"))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(
            err,
            SignalError::StopTimeout { signal, timeout } if signal == "stuck" && timeout == Duration::from_millis(20)
        ));
        assert!(!session.is_active("stuck"));
    }

    #[tokio::test]
    async fn session_can_be_driven_from_a_spawned_task() {
        let server = InMemoryNatsServer::new();
        let config = SessionConfig::default().with_stop_timeout(Duration::from_secs(1));
        let (mut session, mut events) = ExecutorSession::new(config);
        nats::register(&mut session, Arc::new(server.clone()));

        let publisher = server.clone();
        let driver = tokio::spawn(async move {
            session.activate(nats_config("orders", "orders")).await?;
            session.activate(nats_config("payments", "payments")).await?;
            publisher.publish(NatsMessage::new("orders", b"1".to_vec())).await;
            session.deactivate("orders").await?;
            Ok::<_, SignalError>(session.shutdown().await)
        });

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.signal(), "orders");

        let errors = timeout(WAIT, driver).await.unwrap().unwrap().unwrap();
        assert!(errors.is_empty());
        assert_eq!(server.subscriber_count(), 0);
    }
}
