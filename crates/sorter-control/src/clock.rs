//! 单调时钟
//!
//! 状态机只通过 [`Clock`] 读取时间，测试中用 [`MockClock`] 精确推进。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// 单调时间源（毫秒，起点任意）
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// 基于 `Instant` 的系统时钟
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// 手动推进的时钟，克隆体共享同一时间
///
/// ```
/// use sorter_control::{Clock, MockClock};
///
/// let clock = MockClock::new();
/// clock.advance(250);
/// assert_eq!(clock.now_ms(), 250);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
