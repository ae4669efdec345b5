use chrono::{DateTime, Utc};

/// Clock はリコンサイルが参照する現在時刻の供給元。
/// テストでは固定時刻や手動で進める時計に差し替える。
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// SystemClock は実時間（UTC）を返す。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
