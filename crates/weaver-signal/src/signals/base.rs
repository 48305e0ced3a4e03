//! AbstractSignal - 全ての adapter が持つ共通部分
//!
//! adapter は transport 固有の 3 つだけを実装する:
//! 1. connect + subscribe（`start()` の中）
//! 2. native message → [`SourceMessage`] の decode
//! 3. unsubscribe + disconnect（`stop()` の中）
//!
//! listen loop・constraint check・Event の生成・停止の rendezvous はここにある。
//!
//! # Listen loop
//! ```text
//! loop {
//!   select! {
//!     cancelled        => break
//!     msg = inbox.recv => decode ─┬─ Err ─► warn, drop, continue
//!                                 └─ Ok  ─► stamp(id, now) ─► check window ─► attach error
//!   }
//!   select! {
//!     cancelled        => break
//!     events.send(ev)  => (receiver dropped ─► break)
//!   }
//! }
//! ```
//! cancel は両方の待機点で見るので、outbound が詰まっていても `stop()` は返る。

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, warn};

use crate::domain::{
    DecodeError, Event, SignalConfig, SignalConstraints, SignalError, SignalState, SignalType,
    SourceMessage,
};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

/// `SessionConfig::default()` と同じ値
pub const DEFAULT_MESSAGE_BUFFER: usize = 16;

/// Signal が外から受け取る共有リソース
///
/// ExecutorSession が 1 つ持ち、Signal を作るたびに clone して渡す。
#[derive(Clone)]
pub struct SignalContext {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    loops: ActiveLoops,
    message_buffer: usize,
}

impl SignalContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        Self {
            clock,
            ids,
            loops: ActiveLoops::default(),
            message_buffer: DEFAULT_MESSAGE_BUFFER,
        }
    }

    /// Capacity of each signal's inbound message channel (at least 1).
    pub fn with_message_buffer(mut self, message_buffer: usize) -> Self {
        self.message_buffer = message_buffer.max(1);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    pub fn loops(&self) -> &ActiveLoops {
        &self.loops
    }
}

impl Default for SignalContext {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

/// 生きている listen loop の数
///
/// loop の開始で +1、loop の future が drop されると -1。
#[derive(Debug, Clone, Default)]
pub struct ActiveLoops(Arc<AtomicUsize>);

impl ActiveLoops {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> LoopGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        LoopGuard(self.clone())
    }
}

struct LoopGuard(ActiveLoops);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Inbox は listen loop が読む、Signal 専有のメッセージ channel
///
/// 組み込み adapter は bounded mpsc を使う。独自の subscription 型を持つ
/// adapter はこれを実装すれば同じ loop に載せられる。
pub trait Inbox<M>: Send + 'static {
    fn recv(&mut self) -> impl Future<Output = Option<M>> + Send;
}

impl<M: Send + 'static> Inbox<M> for mpsc::Receiver<M> {
    fn recv(&mut self) -> impl Future<Output = Option<M>> + Send {
        mpsc::Receiver::recv(self)
    }
}

/// Handle to a running listen loop.
///
/// Dropping the handle cancels the loop, so a signal that is discarded
/// without `stop()` does not leak its task.
struct ListenLoop {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ListenLoop {
    async fn shutdown(mut self, span: &Span) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.join).await {
            error!(parent: span, error = %e, "listen loop terminated abnormally");
        }
    }
}

impl Drop for ListenLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Event を組み立てる部分（loop と `AbstractSignal::new_event` で共有）
#[derive(Clone)]
struct EventStamper {
    signal: String,
    signal_type: SignalType,
    constraints: SignalConstraints,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl EventStamper {
    fn stamp(&self, payload: Arc<dyn SourceMessage>) -> Event {
        let timestamp = self.clock.now();
        let error = self.constraints.check(timestamp).err();
        Event::new(
            self.ids.generate_event_id(),
            self.signal.clone(),
            self.signal_type.clone(),
            timestamp,
            payload,
            error,
        )
    }
}

/// AbstractSignal は adapter が埋め込む共通状態
///
/// ログは `span()` の下に出す（fields: `signal`, `signal_type`）。
pub struct AbstractSignal {
    config: SignalConfig,
    signal_type: SignalType,
    span: Span,
    context: SignalContext,
    state: SignalState,
    listener: Option<ListenLoop>,
}

impl AbstractSignal {
    pub fn new(signal_type: SignalType, config: SignalConfig, context: SignalContext) -> Self {
        let span = tracing::info_span!(
            "signal",
            signal = %config.name,
            signal_type = %signal_type,
        );
        Self {
            config,
            signal_type,
            span,
            context,
            state: SignalState::Created,
            listener: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn signal_type(&self) -> &SignalType {
        &self.signal_type
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    /// Build an event the same way the listen loop does.
    pub fn new_event(&self, payload: Arc<dyn SourceMessage>) -> Event {
        self.stamper().stamp(payload)
    }

    /// `start()` の最初に呼ぶ。Created 以外なら失敗する。
    pub fn ensure_startable(&self) -> Result<(), SignalError> {
        match self.state {
            SignalState::Created => Ok(()),
            SignalState::Started => Err(SignalError::AlreadyStarted(self.name().to_string())),
            SignalState::Stopped => Err(SignalError::AlreadyStopped(self.name().to_string())),
        }
    }

    pub fn source_mismatch(&self, expected: SignalType) -> SignalError {
        SignalError::SourceMismatch {
            signal: self.name().to_string(),
            expected,
            found: self.config.source.signal_type(),
        }
    }

    /// Bounded channel sized by the session's `message_buffer`.
    pub fn message_channel<M>(&self) -> (mpsc::Sender<M>, mpsc::Receiver<M>) {
        mpsc::channel(self.context.message_buffer)
    }

    /// listen loop を 1 本 spawn して Started に遷移する
    ///
    /// transport の subscribe が成功した後に呼ぶこと。
    pub fn spawn_listener<M, I, D>(&mut self, inbox: I, events: mpsc::Sender<Event>, decode: D)
    where
        M: Send + 'static,
        I: Inbox<M>,
        D: Fn(M) -> Result<Arc<dyn SourceMessage>, DecodeError> + Send + 'static,
    {
        if self.listener.is_some() {
            warn!(parent: &self.span, "listen loop already running, not spawning another");
            return;
        }
        let cancel = CancellationToken::new();
        let guard = self.context.loops.enter();
        let task = listen(inbox, events, decode, self.stamper(), cancel.clone(), guard);
        let join = tokio::spawn(task.instrument(self.span.clone()));

        self.listener = Some(ListenLoop { cancel, join });
        self.state = SignalState::Started;
    }

    /// loop を止めて終了を待つ
    ///
    /// - Created: `NotStarted`（transport には触らない）
    /// - Started: loop 終了まで待って `Ok(true)`。呼び出し側は続けて transport を解放する
    /// - Stopped: 何もせず `Ok(false)`
    pub async fn stop_listener(&mut self) -> Result<bool, SignalError> {
        match self.state {
            SignalState::Created => return Err(SignalError::NotStarted(self.name().to_string())),
            SignalState::Stopped => {
                debug!(parent: &self.span, "stop on an already stopped signal");
                return Ok(false);
            }
            SignalState::Started => {}
        }

        self.state = SignalState::Stopped;
        if let Some(listener) = self.listener.take() {
            listener.shutdown(&self.span).await;
        }
        Ok(true)
    }

    fn stamper(&self) -> EventStamper {
        EventStamper {
            signal: self.config.name.clone(),
            signal_type: self.signal_type.clone(),
            constraints: self.config.constraints,
            clock: self.context.clock.clone(),
            ids: self.context.ids.clone(),
        }
    }
}

async fn listen<M, I, D>(
    mut inbox: I,
    events: mpsc::Sender<Event>,
    decode: D,
    stamper: EventStamper,
    cancel: CancellationToken,
    _guard: LoopGuard,
) where
    I: Inbox<M>,
    D: Fn(M) -> Result<Arc<dyn SourceMessage>, DecodeError>,
{
    debug!("listen loop started");
    loop {
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            raw = inbox.recv() => raw,
        };

        let Some(raw) = raw else {
            warn!("transport closed the message channel, waiting for stop");
            cancel.cancelled().await;
            break;
        };

        let payload = match decode_guarded(&decode, raw) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping message that failed to decode");
                continue;
            }
        };

        let event = stamper.stamp(payload);
        if let Some(violation) = event.error() {
            debug!(
                event_id = %event.id(),
                error = %violation,
                too_early = violation.is_too_early(),
                "constraint check failed"
            );
        }
        debug!(event_id = %event.id(), source = event.payload().source(), "sending event");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = events.send(event) => {
                if sent.is_err() {
                    warn!("event receiver dropped, listen loop exiting");
                    break;
                }
            }
        }
    }
    debug!("listen loop exited");
}

fn decode_guarded<M, D>(decode: &D, raw: M) -> Result<Arc<dyn SourceMessage>, DecodeError>
where
    D: Fn(M) -> Result<Arc<dyn SourceMessage>, DecodeError>,
{
    panic::catch_unwind(AssertUnwindSafe(|| decode(raw)))
        .unwrap_or_else(|cause| Err(DecodeError::Panicked(panic_message(cause.as_ref()))))
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
