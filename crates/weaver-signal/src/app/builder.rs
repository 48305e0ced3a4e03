//! SessionBuilder - ExecutorSession の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::{Event, SignalType};
use crate::ports::{Clock, MqttConnector, NatsConnector, SignalFactory, SystemClock};
use crate::signals::{MqttFactory, NatsFactory};

use super::config::SessionConfig;
use super::session::ExecutorSession;

/// SessionBuilder は ExecutorSession を構築
///
/// # 使用例
/// ```ignore
/// let (session, events) = SessionBuilder::new()
///     .with_nats(Arc::new(server))
///     .expect_signal_types(&["NATS"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_signal_types() で期待される SignalType を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct SessionBuilder {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    factories: Vec<(SignalType, Arc<dyn SignalFactory>)>,
    expected_types: Option<Vec<SignalType>>,
}

/// BuildError は Session 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing signal types: {0:?}. These signal types were expected but not registered.")]
    MissingSignalTypes(Vec<SignalType>),
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            factories: Vec::new(),
            expected_types: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Factory を登録（同じ tag は後勝ち）
    pub fn with_factory(
        mut self,
        signal_type: impl Into<SignalType>,
        factory: impl SignalFactory + 'static,
    ) -> Self {
        self.factories.push((signal_type.into(), Arc::new(factory)));
        self
    }

    pub fn with_nats(self, connector: Arc<dyn NatsConnector>) -> Self {
        self.with_factory(SignalType::nats(), NatsFactory::new(connector))
    }

    pub fn with_mqtt(self, connector: Arc<dyn MqttConnector>) -> Self {
        self.with_factory(SignalType::mqtt(), MqttFactory::new(connector))
    }

    /// 期待される SignalType のリストを設定
    pub fn expect_signal_types(mut self, signal_types: &[&str]) -> Self {
        self.expected_types = Some(signal_types.iter().map(|&t| SignalType::new(t)).collect());
        self
    }

    /// # 検証
    /// - expect_signal_types() で設定された SignalType が全て登録されているかチェック
    /// - 不足があれば BuildError::MissingSignalTypes を返す
    pub fn build(self) -> Result<(ExecutorSession, mpsc::Receiver<Event>), BuildError> {
        if let Some(expected) = &self.expected_types {
            let missing: Vec<SignalType> = expected
                .iter()
                .filter(|t| !self.factories.iter().any(|(registered, _)| registered == *t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingSignalTypes(missing));
            }
        }

        let (mut session, events) = ExecutorSession::with_clock(self.config, self.clock);
        for (signal_type, factory) in self.factories {
            session.add_shared_factory(signal_type, factory);
        }
        Ok((session, events))
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
