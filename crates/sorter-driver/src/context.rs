//! 读写线程共享的状态
//!
//! - [`PendingTable`]: 阻塞命令 ID → 完成通知
//! - [`MotionGate`]: 在途 `T` 命令计数，归零时唤醒等待的写线程
//! - [`BusContext`]: 以上两者加回调注册表与指标

use crate::hooks::CallbackRegistry;
use crate::metrics::BusMetrics;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, RwLock};
use sorter_protocol::CommandId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 阻塞命令的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub ok: bool,
    pub line: String,
}

/// 等待中的阻塞命令
#[derive(Debug, Default)]
pub struct PendingTable {
    waiters: Mutex<HashMap<CommandId, Sender<Completion>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: CommandId, waiter: Sender<Completion>) {
        self.waiters.lock().insert(id, waiter);
    }

    pub fn contains(&self, id: CommandId) -> bool {
        self.waiters.lock().contains_key(&id)
    }

    pub fn remove(&self, id: CommandId) -> bool {
        self.waiters.lock().remove(&id).is_some()
    }

    /// 通知等待者，返回是否找到
    pub fn resolve(&self, id: CommandId, ok: bool, line: &str) -> bool {
        let waiter = self.waiters.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.try_send(Completion {
                    ok,
                    line: line.to_string(),
                });
                true
            },
            None => false,
        }
    }

    /// 丢弃所有等待者（等待端随即看到通道断开）
    pub fn clear(&self) {
        self.waiters.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 在途运动命令计数
#[derive(Debug, Default)]
pub struct MotionGate {
    outstanding: Mutex<u32>,
    drained: Condvar,
}

impl MotionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> u32 {
        *self.outstanding.lock()
    }

    /// 写出一条 `T` 命令后调用
    pub fn acquire(&self) {
        *self.outstanding.lock() += 1;
    }

    /// 收到 `T done` 或 `ERR,T,...` 后调用（不会低于 0）
    pub fn release(&self) {
        let mut count = self.outstanding.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// 强制清零（运维恢复用）
    pub fn reset(&self) {
        *self.outstanding.lock() = 0;
        self.drained.notify_all();
    }

    /// 唤醒所有等待者（关闭时使用）
    pub fn wake_all(&self) {
        self.drained.notify_all();
    }

    /// 等待计数归零
    ///
    /// 每个 `slice` 检查一次 `keep_waiting`，返回 `false` 时放弃。
    /// 返回是否已归零。
    pub fn wait_drained(&self, slice: Duration, mut keep_waiting: impl FnMut(u32) -> bool) -> bool {
        let mut count = self.outstanding.lock();
        while *count > 0 {
            if !keep_waiting(*count) {
                return false;
            }
            self.drained.wait_for(&mut count, slice);
        }
        true
    }
}

/// 总线共享上下文
#[derive(Debug)]
pub struct BusContext {
    pub pending: PendingTable,
    pub motion: MotionGate,
    pub callbacks: RwLock<CallbackRegistry>,
    pub metrics: BusMetrics,
    pub is_running: AtomicBool,
}

impl BusContext {
    pub fn new() -> Self {
        Self {
            pending: PendingTable::new(),
            motion: MotionGate::new(),
            callbacks: RwLock::new(CallbackRegistry::new()),
            metrics: BusMetrics::new(),
            is_running: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Release);
        self.motion.wake_all();
    }
}

impl Default for BusContext {
    fn default() -> Self {
        Self::new()
    }
}
