use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("rotationIntervalHours must be positive, got {0}")]
    NonPositive(i64),

    #[error("rotationIntervalHours is too large: {0}")]
    OutOfRange(i64),
}

/// RotationSchedule は検証済み（正の値）のローテーション周期。
///
/// 判定と再スケジュール計算はすべて引数の `now` に対して行い、内部で時刻を取得しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSchedule {
    interval: TimeDelta,
}

impl RotationSchedule {
    /// from_hours は時間単位の周期から RotationSchedule を作る。
    /// 0 以下や TimeDelta で表現できない値は拒否する。
    pub fn from_hours(hours: i64) -> Result<Self, ScheduleError> {
        if hours <= 0 {
            return Err(ScheduleError::NonPositive(hours));
        }
        let interval = TimeDelta::try_hours(hours).ok_or(ScheduleError::OutOfRange(hours))?;
        // std::time::Duration への変換も保証しておく
        interval.to_std().map_err(|_| ScheduleError::OutOfRange(hours))?;
        Ok(Self { interval })
    }

    /// is_due は未ローテーション、または最終ローテーションから周期以上経過していれば true。
    pub fn is_due(&self, last_rotation: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_rotation {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }

    /// next_delay は次にローテーション期限を迎えるまでの待ち時間を返す。
    ///
    /// - 未ローテーション: 周期そのもの
    /// - 経過時間が周期未満: 周期 - 経過時間（最終ローテーションが未来でも周期を上限とする）
    /// - 期限超過: 0
    pub fn next_delay(&self, last_rotation: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let remaining = match last_rotation {
            None => self.interval,
            Some(last) => {
                let elapsed = (now - last).max(TimeDelta::zero());
                if elapsed < self.interval {
                    self.interval - elapsed
                } else {
                    TimeDelta::zero()
                }
            }
        };
        remaining.to_std().unwrap_or(Duration::ZERO)
    }

    /// interval_std は周期を std::time::Duration で返す。ローテーション直後の再キュー間隔に使う。
    pub fn interval_std(&self) -> Duration {
        self.interval.to_std().unwrap_or(Duration::ZERO)
    }
}
