//! 命令总线
//!
//! 提供对外的 `CommandBus`，封装读写线程、命令 ID 分配与阻塞等待。

use crate::context::{BusContext, Completion};
use crate::error::DriverError;
use crate::hooks::LineCallback;
use crate::metrics::BusMetricsSnapshot;
use crate::pipeline::{BusConfig, QueuedCommand, reader_loop, writer_loop};
use crate::sink::CommandSink;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use sorter_protocol::{COMMAND_ID_START, CommandId, ControllerCommand, next_command_id};
use sorter_serial::SplittablePort;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 带超时的线程回收
///
/// 超时后回收线程继续在后台等待目标线程结束。
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> Result<(), &'static str>;
}

impl JoinTimeout for JoinHandle<()> {
    fn join_timeout(self, timeout: Duration) -> Result<(), &'static str> {
        let (tx, rx) = bounded(1);
        spawn(move || {
            let _ = tx.send(self.join().is_ok());
        });
        match rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) => Err("thread panicked"),
            Err(RecvTimeoutError::Timeout) => Err("thread join timeout"),
            Err(RecvTimeoutError::Disconnected) => Err("thread panicked during join"),
        }
    }
}

/// 命令总线
///
/// 独占一条串口。所有方法都可以在多个线程中通过 `&self` 调用，
/// 通常以 `Arc<CommandBus>` 的形式交给各个轴。
///
/// # 示例
///
/// ```no_run
/// use sorter_driver::{BusConfig, CommandBus};
/// use sorter_protocol::ControllerCommand;
/// use sorter_serial::SimulatedController;
/// use std::time::Duration;
///
/// let bus = CommandBus::new(SimulatedController::default(), BusConfig::default()).unwrap();
/// bus.submit(ControllerCommand::DigitalWrite { pin: 30, value: 0 }).unwrap();
/// bus.close();
/// ```
pub struct CommandBus {
    queue_tx: Sender<QueuedCommand>,
    /// 关闭时用于丢弃剩余队列
    queue_rx: Receiver<QueuedCommand>,
    next_id: Mutex<CommandId>,
    ctx: Arc<BusContext>,
    config: BusConfig,
    writer_thread: Mutex<Option<JoinHandle<()>>>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    worker_dead_logged: AtomicBool,
}

impl CommandBus {
    /// 在一个串口上启动命令总线
    ///
    /// # 错误
    /// - `DriverError::Serial`: 串口分离失败
    pub fn new<P>(port: P, config: BusConfig) -> Result<Self, DriverError>
    where
        P: SplittablePort,
        P::RxPort: Send + 'static,
        P::TxPort: Send + 'static,
    {
        let (rx_port, tx_port) = port.split()?;
        let (queue_tx, queue_rx) = unbounded::<QueuedCommand>();
        let ctx = Arc::new(BusContext::new());

        let ctx_writer = ctx.clone();
        let queue_writer = queue_rx.clone();
        let config_writer = config.clone();
        let writer_thread = std::thread::Builder::new()
            .name("sorter-bus-writer".into())
            .spawn(move || writer_loop(tx_port, queue_writer, ctx_writer, config_writer))
            .map_err(|e| DriverError::IoThread(e.to_string()))?;

        let ctx_reader = ctx.clone();
        let reader_thread = std::thread::Builder::new()
            .name("sorter-bus-reader".into())
            .spawn(move || reader_loop(rx_port, ctx_reader))
            .map_err(|e| DriverError::IoThread(e.to_string()))?;

        info!("Command bus started");

        Ok(Self {
            queue_tx,
            queue_rx,
            next_id: Mutex::new(COMMAND_ID_START),
            ctx,
            config,
            writer_thread: Mutex::new(Some(writer_thread)),
            reader_thread: Mutex::new(Some(reader_thread)),
            worker_dead_logged: AtomicBool::new(false),
        })
    }

    /// 分配 ID 并入队
    ///
    /// ID 分配与入队在同一把锁内完成，保证线上顺序与 ID 顺序一致。
    fn enqueue(
        &self,
        command: ControllerCommand,
        blocking: Option<(Sender<()>, Sender<Completion>)>,
    ) -> Result<CommandId, DriverError> {
        if !self.ctx.is_running() {
            return Err(DriverError::NotRunning);
        }

        let writer_dead = self
            .writer_thread
            .lock()
            .as_ref()
            .is_none_or(|h| h.is_finished());
        if writer_dead && !self.worker_dead_logged.swap(true, Ordering::Relaxed) {
            error!("Command bus writer is not alive; queued commands will not be sent");
        }

        let is_motion = command.is_motion();
        let is_blocking = blocking.is_some();
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next = next_command_id(id);

            let sent = blocking.map(|(sent, done)| {
                self.ctx.pending.insert(id, done);
                sent
            });
            self.queue_tx
                .send(QueuedCommand { id, command, sent })
                .map_err(|_| DriverError::ChannelClosed)?;
            id
        };

        self.ctx.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        if is_blocking {
            self.ctx.metrics.blocking.fetch_add(1, Ordering::Relaxed);
        }

        let queued = self.queue_tx.len();
        if queued > self.config.backlog_warn {
            warn!("Command queue size is large: {} commands pending", queued);
        }
        if is_motion && queued > self.config.motion_backlog_warn {
            warn!(
                "Motion command queued with backlog: {} commands pending",
                queued
            );
        }

        Ok(id)
    }

    /// Fire-and-Forget 提交
    pub fn submit(&self, command: ControllerCommand) -> Result<CommandId, DriverError> {
        self.enqueue(command, None)
    }

    /// 阻塞提交，等待 MCU 完成
    pub fn submit_blocking(
        &self,
        command: ControllerCommand,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        if timeout.is_zero() {
            return Err(DriverError::InvalidTimeout);
        }
        if !self.ctx.is_running() {
            return Err(DriverError::NotRunning);
        }

        let (sent_tx, sent_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<Completion>(1);
        let tag = command.tag().to_string();
        let payload = command.to_string();
        let id = self.enqueue(command, Some((sent_tx, done_tx)))?;
        let timeout_ms = timeout.as_millis() as u64;

        info!(
            "Blocking command queued id={} timeout_ms={} cmd={}",
            id, timeout_ms, payload
        );

        // 超时从命令写出后开始计算
        let send_wait = Duration::from_millis(self.config.max_send_wait_ms);
        match sent_rx.recv_timeout(send_wait) {
            Ok(()) => {},
            Err(RecvTimeoutError::Timeout) => {
                self.ctx.pending.remove(id);
                self.ctx.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Blocking command id={} type={} not sent within {}ms",
                    id, tag, self.config.max_send_wait_ms
                );
                return Err(DriverError::NotSent {
                    id,
                    waited_ms: self.config.max_send_wait_ms,
                });
            },
            Err(RecvTimeoutError::Disconnected) => {
                self.ctx.pending.remove(id);
                if let Ok(done) = done_rx.try_recv() {
                    error!("Blocking command failed id={} type={}", id, tag);
                    return Err(DriverError::CommandFailed {
                        id,
                        line: done.line,
                    });
                }
                return Err(if self.ctx.is_running() {
                    DriverError::ChannelClosed
                } else {
                    DriverError::NotRunning
                });
            },
        }

        match done_rx.recv_timeout(timeout) {
            Ok(done) if done.ok => {
                info!("Blocking command ok id={} type={}", id, tag);
                Ok(done.line)
            },
            Ok(done) => {
                error!("Blocking command failed id={} type={}", id, tag);
                Err(DriverError::CommandFailed {
                    id,
                    line: done.line,
                })
            },
            Err(RecvTimeoutError::Timeout) => {
                self.ctx.pending.remove(id);
                self.ctx.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Blocking command timed out id={} type={} after {}ms",
                    id, tag, timeout_ms
                );
                Err(DriverError::Timeout { id, timeout_ms })
            },
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::NotRunning),
        }
    }

    /// 注册行回调（按第一个逗号字段分发）
    pub fn register_callback(
        &self,
        tag: impl Into<String>,
        callback: impl LineCallback + 'static,
    ) -> bool {
        self.ctx.callbacks.write().register(tag, Arc::new(callback))
    }

    /// 队列中尚未写出的命令数
    pub fn pending_commands(&self) -> usize {
        self.queue_tx.len()
    }

    /// 在途运动命令数
    pub fn outstanding_motion(&self) -> u32 {
        self.ctx.motion.outstanding()
    }

    /// 清零在途运动计数（丢失完成行后的人工恢复）
    pub fn reset_motion_counter(&self) {
        let outstanding = self.ctx.motion.outstanding();
        if outstanding > 0 {
            warn!("Resetting {} outstanding motion command(s)", outstanding);
        }
        self.ctx.motion.reset();
    }

    /// 等待队列全部被写线程处理
    ///
    /// 返回是否在超时前清空。
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.ctx.metrics.snapshot().backlog() == 0 {
                return true;
            }
            if Instant::now() >= deadline || !self.is_healthy() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// 获取指标快照
    pub fn metrics(&self) -> BusMetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 线程存活状态 `(writer_alive, reader_alive)`
    pub fn check_health(&self) -> (bool, bool) {
        let alive = |slot: &Mutex<Option<JoinHandle<()>>>| {
            slot.lock().as_ref().is_some_and(|h| !h.is_finished())
        };
        (alive(&self.writer_thread), alive(&self.reader_thread))
    }

    pub fn is_healthy(&self) -> bool {
        let (writer, reader) = self.check_health();
        writer && reader
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    /// 关闭总线：丢弃队列中的命令，唤醒所有等待者，等待线程退出
    ///
    /// 可重复调用。
    pub fn close(&self) {
        let writer = self.writer_thread.lock().take();
        let reader = self.reader_thread.lock().take();
        if writer.is_none() && reader.is_none() {
            return;
        }

        info!("Closing command bus...");
        self.ctx.stop();

        let mut discarded = 0usize;
        while self.queue_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            info!("Discarded {} queued command(s)", discarded);
        }
        self.ctx.pending.clear();

        let join_timeout = Duration::from_millis(self.config.join_timeout_ms);
        for (name, handle) in [("writer", writer), ("reader", reader)] {
            if let Some(handle) = handle
                && let Err(e) = handle.join_timeout(join_timeout)
            {
                error!("{} thread failed to shut down within {:?}: {}", name, join_timeout, e);
            }
        }

        info!("Command bus closed");
    }
}

impl CommandSink for CommandBus {
    fn submit(&self, command: ControllerCommand) -> Result<CommandId, DriverError> {
        CommandBus::submit(self, command)
    }

    fn submit_blocking(
        &self,
        command: ControllerCommand,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        CommandBus::submit_blocking(self, command, timeout)
    }

    fn is_running(&self) -> bool {
        CommandBus::is_running(self)
    }
}

impl Drop for CommandBus {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBus")
            .field("running", &self.ctx.is_running())
            .field("queued", &self.queue_tx.len())
            .field("outstanding_motion", &self.ctx.motion.outstanding())
            .finish()
    }
}
