//! 命令总线指标
//!
//! 所有计数器都使用原子操作，可以在任何线程安全地读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 命令总线实时指标
///
/// ```rust
/// use sorter_driver::BusMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = BusMetrics::default();
/// metrics.submitted.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().submitted, 1);
/// ```
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// 入队命令总数
    pub submitted: AtomicU64,
    /// 其中阻塞命令数
    pub blocking: AtomicU64,
    /// 写线程已处理（写出、跳过或失败）的命令数
    pub processed: AtomicU64,
    /// 成功写出的行数
    pub written: AtomicU64,
    /// 被放弃而未写出的阻塞命令数
    pub skipped: AtomicU64,
    /// 写失败次数
    pub write_errors: AtomicU64,
    /// 读到的非空行数
    pub lines_received: AtomicU64,
    /// 成功完成的命令数（匹配到等待者）
    pub completions: AtomicU64,
    /// MCU 报告失败的命令数
    pub failures: AtomicU64,
    /// 阻塞调用超时次数
    pub timeouts: AtomicU64,
    /// 回调分发次数
    pub callbacks_dispatched: AtomicU64,
    /// 没有等待者的完成/错误行
    pub unmatched: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取快照
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            blocking: self.blocking.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            lines_received: self.lines_received.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            callbacks_dispatched: self.callbacks_dispatched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusMetricsSnapshot {
    pub submitted: u64,
    pub blocking: u64,
    pub processed: u64,
    pub written: u64,
    pub skipped: u64,
    pub write_errors: u64,
    pub lines_received: u64,
    pub completions: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub callbacks_dispatched: u64,
    pub unmatched: u64,
}

impl BusMetricsSnapshot {
    /// 尚未被写线程处理的命令数
    pub fn backlog(&self) -> u64 {
        self.submitted.saturating_sub(self.processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_backlog() {
        let metrics = BusMetrics::new();
        metrics.submitted.fetch_add(5, Ordering::Relaxed);
        metrics.processed.fetch_add(3, Ordering::Relaxed);
        metrics.written.fetch_add(3, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.submitted, 5);
        assert_eq!(snap.written, 3);
        assert_eq!(snap.backlog(), 2);
    }

    #[test]
    fn test_backlog_never_negative() {
        let snap = BusMetricsSnapshot {
            processed: 2,
            ..Default::default()
        };
        assert_eq!(snap.backlog(), 0);
    }
}
