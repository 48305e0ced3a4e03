//! Constraint - Event の時刻を検証する time window
//!
//! 全ての Signal が、送信元に関係なく同じ検査を通す。
//! 検査は純粋関数（副作用なし）で、違反は Event の error として添付される。
//! ループは止めない。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TimeWindow は `[start, end)` の半開区間
///
/// どちらの端も省略可能で、省略した側は無制限になる。
///
/// # 境界
/// - `start` ちょうどは範囲内
/// - `end` ちょうどは範囲外
///
/// # 設定例（JSON）
/// ```json
/// { "start": "2020-01-01T00:00:00Z", "end": "2020-01-02T00:00:00Z" }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawTimeWindow")]
pub struct TimeWindow {
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawTimeWindow {
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
}

impl TryFrom<RawTimeWindow> for TimeWindow {
    type Error = InvalidTimeWindow;

    fn try_from(raw: RawTimeWindow) -> Result<Self, Self::Error> {
        TimeWindow::new(raw.start, raw.end)
    }
}

/// 空の区間（start >= end）を作ろうとした
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("time window start {start} must be before end {end}")]
pub struct InvalidTimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, InvalidTimeWindow> {
        if let (Some(start), Some(end)) = (start, end)
            && start >= end
        {
            return Err(InvalidTimeWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// `[start, end)`
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InvalidTimeWindow> {
        Self::new(Some(start), Some(end))
    }

    /// 全ての時刻を受け入れる
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn ending_at(end: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        let after_start = self.start.is_none_or(|start| timestamp >= start);
        let before_end = self.end.is_none_or(|end| timestamp < end);
        after_start && before_end
    }

    /// Constraint check
    ///
    /// 範囲内なら `Ok(())`、範囲外なら timestamp と区間を持つ `ConstraintViolation`。
    pub fn check(&self, timestamp: DateTime<Utc>) -> Result<(), ConstraintViolation> {
        if self.contains(timestamp) {
            Ok(())
        } else {
            Err(ConstraintViolation {
                timestamp,
                window: *self,
            })
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start {
            Some(start) => write!(f, "[{}, ", start.to_rfc3339())?,
            None => f.write_str("(-inf, ")?,
        }
        match self.end {
            Some(end) => write!(f, "{})", end.to_rfc3339()),
            None => f.write_str("+inf)"),
        }
    }
}

/// Event の timestamp が time window の外にある
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timestamp {ts} is outside the allowed window {window}", ts = .timestamp.to_rfc3339())]
pub struct ConstraintViolation {
    timestamp: DateTime<Utc>,
    window: TimeWindow,
}

impl ConstraintViolation {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// 下限より前だったか（false なら上限以降）
    pub fn is_too_early(&self) -> bool {
        self.window
            .start
            .is_some_and(|start| self.timestamp < start)
    }
}

/// SignalConstraints は Signal ごとの制約
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalConstraints {
    #[serde(default)]
    pub time: TimeWindow,
}

impl SignalConstraints {
    pub fn new(time: TimeWindow) -> Self {
        Self { time }
    }

    pub fn check(&self, timestamp: DateTime<Utc>) -> Result<(), ConstraintViolation> {
        self.time.check(timestamp)
    }
}
