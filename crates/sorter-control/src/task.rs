//! 后台任务
//!
//! 状态进入时启动、离开时取消。取消只是一个标志位：任务在开始耗时操作前检查它，
//! 已经发出的硬件命令不会被中途打断。结果在下一次 tick 通过 [`BackgroundTask::poll`] 取回。

use crossbeam_channel::{Receiver, TryRecvError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// 取消标志，克隆体共享同一状态
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// 轮询结果
#[derive(Debug)]
pub enum TaskPoll<T> {
    /// 仍在运行
    Pending,
    /// 已完成
    Done(T),
    /// 线程退出但没有结果（panic）
    Lost,
}

/// 在独立线程上运行的一次性任务
pub struct BackgroundTask<T> {
    name: String,
    token: CancellationToken,
    result_rx: Receiver<T>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// 启动任务
    ///
    /// # 错误
    /// 系统无法创建线程时返回 `std::io::Error`
    pub fn spawn<F>(name: &str, job: F) -> std::io::Result<Self>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
    {
        let token = CancellationToken::new();
        let (result_tx, result_rx) = bounded(1);
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = job(&worker_token);
                let _ = result_tx.send(result);
            })?;
        debug!("Background task '{}' started", name);
        Ok(Self {
            name: name.to_string(),
            token,
            result_rx,
            handle: Some(handle),
        })
    }

    /// 非阻塞地检查结果
    pub fn poll(&mut self) -> TaskPoll<T> {
        match self.result_rx.try_recv() {
            Ok(result) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                TaskPoll::Done(result)
            },
            Err(TryRecvError::Empty) => TaskPoll::Pending,
            Err(TryRecvError::Disconnected) => TaskPoll::Lost,
        }
    }
}

impl<T> BackgroundTask<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        self.token.cancel();
        // 不等待线程：正在执行的硬件命令自行结束
        if self.handle.is_some() {
            debug!("Background task '{}' detached", self.name);
        }
    }
}
