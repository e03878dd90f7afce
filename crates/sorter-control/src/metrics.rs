//! 控制循环耗时统计
//!
//! 协调器在每个 tick 分别记录三条状态机 `step` 的耗时和整个 tick 的耗时（微秒）。
//! 只在控制循环线程上写入，通过 [`crate::CoordinatorStatus`] 读取快照。

use serde::Serialize;
use std::time::{Duration, Instant};

/// 单项耗时统计
///
/// ```rust
/// use sorter_control::DurationStats;
/// use std::time::Duration;
///
/// let mut stats = DurationStats::default();
/// stats.record(Duration::from_micros(300));
/// stats.record(Duration::from_micros(100));
/// assert_eq!((stats.last_us, stats.max_us, stats.mean_us), (100, 300, 200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub last_us: u64,
    pub max_us: u64,
    pub mean_us: u64,
    #[serde(skip)]
    total_us: u64,
}

impl DurationStats {
    pub fn record(&mut self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count += 1;
        self.last_us = us;
        self.max_us = self.max_us.max(us);
        self.total_us = self.total_us.saturating_add(us);
        self.mean_us = self.total_us / self.count;
    }
}

/// 协调器各阶段耗时
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StepTimings {
    pub feeder: DurationStats,
    pub classification: DurationStats,
    pub distribution: DurationStats,
    /// 整个 tick
    pub total: DurationStats,
}

/// 执行 `f` 并把耗时记入 `stats`
pub(crate) fn timed(stats: &mut DurationStats, f: impl FnOnce()) {
    let started = Instant::now();
    f();
    stats.record(started.elapsed());
}
