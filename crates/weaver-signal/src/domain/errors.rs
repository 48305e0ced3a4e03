//! Errors - Signal のエラー型と分類
//!
//! # 分類
//! - **Start/Stop で同期的に返る**: Connection, Subscription, Unsubscribe
//! - **ライフサイクル違反**: AlreadyStarted, AlreadyStopped, NotStarted
//! - **Session / Registry**: UnknownSignalType, DuplicateSignal, SignalNotActive, StopTimeout
//! - **ループ内で処理される**: DecodeError（ログして破棄）、
//!   ConstraintViolation（Event に添付、`domain::constraint` 参照）
//!
//! core 自身はリトライしない。判断は呼び出し側（ExecutorSession の利用者）に任せる。

use std::time::Duration;

use thiserror::Error;

use super::signal_type::SignalType;

/// Transport port が返すエラー
///
/// wire client ごとにエラー型が異なるので trait object で受け取る。
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SignalError は Signal の start/stop と Session 操作のエラー
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("failed to connect to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to subscribe to {target}: {source}")]
    Subscription {
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to unsubscribe from {target}: {source}")]
    Unsubscribe {
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("no factory registered for signal type {0}")]
    UnknownSignalType(SignalType),

    #[error("signal {0} is already started")]
    AlreadyStarted(String),

    #[error("signal {0} was stopped and cannot be started again")]
    AlreadyStopped(String),

    #[error("signal {0} has not been started")]
    NotStarted(String),

    /// Factory に渡された source 設定が adapter と合わない
    #[error("signal {signal} expects a {expected} source but was configured with {found}")]
    SourceMismatch {
        signal: String,
        expected: SignalType,
        found: SignalType,
    },

    #[error("signal {0} is already active in this session")]
    DuplicateSignal(String),

    #[error("signal {0} is not active in this session")]
    SignalNotActive(String),

    #[error("signal {signal} did not stop within {timeout:?}")]
    StopTimeout { signal: String, timeout: Duration },
}

/// DecodeError は transport message を Event に変換できなかったことを示す
///
/// ループの外には出ない。該当メッセージだけ破棄してログに残す。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message has an empty subject")]
    EmptySubject,

    #[error("malformed header block: {0}")]
    MalformedHeaders(String),

    #[error("topic is not valid UTF-8")]
    InvalidTopicEncoding,

    #[error("topic name {0:?} contains a wildcard")]
    WildcardInTopic(String),

    #[error("decoder panicked: {0}")]
    Panicked(String),
}
