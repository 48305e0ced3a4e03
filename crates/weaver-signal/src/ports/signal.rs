//! Signal port - 全ての transport adapter が満たす契約
//!
//! # ライフサイクル
//! ```text
//! Created ──start()──► Started ──stop()──► Stopped
//! ```
//! - `start()` は subscribe まで行い、listen loop を 1 本 spawn して即座に返る
//! - `stop()` は loop の終了を待ってから transport を解放する（rendezvous）
//! - 2 回目の `stop()` は何もしない

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{Event, SignalError, SignalState, SignalType};
use crate::signals::AbstractSignal;

/// Signal は外部の通知元 1 つを購読して Event を送出する
///
/// 実装は共通部分を [`AbstractSignal`] に委譲し、
/// transport 固有の subscribe / decode / unsubscribe だけを持つ。
#[async_trait]
pub trait Signal: Send {
    fn base(&self) -> &AbstractSignal;

    /// Subscribe to the transport and spawn the listen loop.
    ///
    /// `events` is owned by the executor session; the signal only sends on it.
    async fn start(&mut self, events: mpsc::Sender<Event>) -> Result<(), SignalError>;

    /// Stop the listen loop, wait for it to exit, then release the transport.
    async fn stop(&mut self) -> Result<(), SignalError>;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn signal_type(&self) -> &SignalType {
        self.base().signal_type()
    }

    fn state(&self) -> SignalState {
        self.base().state()
    }
}

/// SignalFactory は type tag ごとに登録される Signal のコンストラクタ
///
/// # 契約
/// - I/O をしない（接続は `start()` で行う）
/// - 失敗しない（設定は上流で検証済みの前提）
pub trait SignalFactory: Send + Sync {
    fn create(&self, base: AbstractSignal) -> Box<dyn Signal>;
}
