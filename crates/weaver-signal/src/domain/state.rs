//! State - Signal インスタンスの状態

/// SignalState は Signal インスタンスのライフサイクル
///
/// # 状態遷移
/// - Created → Started: `start()` 成功時のみ
/// - Started → Stopped: `stop()` のみ
///
/// Stopped からは戻らない（停止したインスタンスは破棄する）。
/// `start()` が失敗した場合は Created のまま。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalState {
    Created,
    Started,
    Stopped,
}
