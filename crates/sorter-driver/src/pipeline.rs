//! 读写线程主循环
//!
//! - [`writer_loop`]: 从 FIFO 队列取命令，编码后写入串口，命令之间保持 `write_delay`
//! - [`reader_loop`]: 逐行解析 MCU 响应，唤醒阻塞调用者、递减运动计数、分发回调

use crate::context::BusContext;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use sorter_protocol::{CommandId, ControllerCommand, ResponseLine, encode_line};
use sorter_serial::{RxPort, SerialError, TxPort};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 总线配置（POD）
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// 两条命令之间的最小间隔（毫秒）
    pub write_delay_ms: u64,
    /// 阻塞命令等待写出的最长时间（毫秒）
    pub max_send_wait_ms: u64,
    /// 写线程队列轮询间隔（毫秒）
    pub queue_poll_ms: u64,
    /// 等待运动计数归零时的告警间隔（毫秒）
    pub drain_warn_interval_ms: u64,
    /// 队列长度超过该值时告警
    pub backlog_warn: usize,
    /// 运动命令入队时，队列长度超过该值告警
    pub motion_backlog_warn: usize,
    /// 关闭时等待线程退出的时间（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            write_delay_ms: 50,
            max_send_wait_ms: 30_000,
            queue_poll_ms: 100,
            drain_warn_interval_ms: 5_000,
            backlog_warn: 10,
            motion_backlog_warn: 3,
            join_timeout_ms: 2_000,
        }
    }
}

/// 队列中的命令
#[derive(Debug)]
pub struct QueuedCommand {
    pub id: CommandId,
    pub command: ControllerCommand,
    /// 阻塞命令：写出后通知调用者开始计时
    pub sent: Option<Sender<()>>,
}

impl QueuedCommand {
    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.sent.is_some()
    }
}

/// 写线程主循环
///
/// 写失败时，阻塞命令以失败结束，线程退出（之后入队的命令不再被发送）。
pub fn writer_loop(
    mut tx: impl TxPort,
    queue: Receiver<QueuedCommand>,
    ctx: Arc<BusContext>,
    config: BusConfig,
) {
    let poll = Duration::from_millis(config.queue_poll_ms.max(1));
    let write_delay = Duration::from_millis(config.write_delay_ms);
    let warn_interval = Duration::from_millis(config.drain_warn_interval_ms.max(1));

    loop {
        if !ctx.is_running() {
            trace!("writer thread: is_running flag is false, exiting");
            break;
        }

        let item = match queue.recv_timeout(poll) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                trace!("writer thread: command queue disconnected");
                break;
            },
        };

        if !ctx.is_running() {
            break;
        }

        if item.is_blocking() {
            if !ctx.pending.contains(item.id) {
                warn!(
                    "Skipping abandoned blocking command id={} ({})",
                    item.id, item.command
                );
                ctx.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                ctx.metrics.processed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // 阻塞命令必须等所有在途运动完成
            let started = Instant::now();
            let mut last_warn = Instant::now();
            let drained = ctx.motion.wait_drained(poll, |outstanding| {
                if last_warn.elapsed() >= warn_interval {
                    warn!(
                        "Blocking command id={} still waiting for {} outstanding motion command(s) ({:?})",
                        item.id,
                        outstanding,
                        started.elapsed()
                    );
                    last_warn = Instant::now();
                }
                ctx.is_running() && ctx.pending.contains(item.id)
            });
            if !drained {
                if ctx.is_running() {
                    warn!(
                        "Blocking command id={} abandoned while waiting for motion to drain",
                        item.id
                    );
                    ctx.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                    ctx.metrics.processed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                break;
            }
            // 等待期间调用者可能已超时放弃
            if !ctx.pending.contains(item.id) {
                warn!(
                    "Skipping blocking command id={} abandoned during motion drain",
                    item.id
                );
                ctx.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                ctx.metrics.processed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        }

        let line = encode_line(item.id, &item.command);
        if let Err(e) = tx.write_line(&line) {
            error!("writer thread: failed to write command id={}: {}", item.id, e);
            ctx.metrics.write_errors.fetch_add(1, Ordering::Relaxed);
            ctx.metrics.processed.fetch_add(1, Ordering::Relaxed);
            if item.is_blocking() {
                ctx.pending
                    .resolve(item.id, false, &format!("write failed: {}", e));
            }
            break;
        }

        if item.command.is_motion() {
            ctx.motion.acquire();
        }
        ctx.metrics.written.fetch_add(1, Ordering::Relaxed);
        ctx.metrics.processed.fetch_add(1, Ordering::Relaxed);
        debug!("controller <- {}", line.trim_end());

        if let Some(sent) = &item.sent {
            let _ = sent.try_send(());
        }

        spin_sleep::sleep(write_delay);
    }

    trace!("writer thread: exited");
}

/// 读线程主循环
pub fn reader_loop(mut rx: impl RxPort, ctx: Arc<BusContext>) {
    loop {
        if !ctx.is_running() {
            trace!("reader thread: is_running flag is false, exiting");
            break;
        }

        let line = match rx.read_line() {
            Ok(line) => line,
            Err(SerialError::Timeout) => continue,
            Err(SerialError::Closed) => {
                trace!("reader thread: port closed");
                break;
            },
            Err(e) => {
                if ctx.is_running() {
                    error!("reader thread: error reading from controller: {}", e);
                }
                break;
            },
        };

        handle_line(&line, &ctx);
    }

    trace!("reader thread: exited");
}

/// 处理一行 MCU 输出
pub fn handle_line(raw: &str, ctx: &BusContext) {
    let line = raw.trim();
    if line.is_empty() {
        return;
    }
    ctx.metrics.lines_received.fetch_add(1, Ordering::Relaxed);

    let parsed = match ResponseLine::parse(line) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("unparsed controller line {:?}: {}", line, e);
            None
        },
    };

    if let Some(parsed) = &parsed {
        if parsed.releases_motion() {
            ctx.motion.release();
        }
        if let Some((id, ok)) = parsed.resolution() {
            if ok {
                ctx.metrics.completions.fetch_add(1, Ordering::Relaxed);
            } else {
                ctx.metrics.failures.fetch_add(1, Ordering::Relaxed);
            }
            if !ctx.pending.resolve(id, ok, line) {
                ctx.metrics.unmatched.fetch_add(1, Ordering::Relaxed);
                if !ok {
                    error!("Command id={} failed: {}", id, line);
                }
            }
        }
    }

    let dispatched = ctx.callbacks.read().dispatch(line);
    if dispatched {
        ctx.metrics.callbacks_dispatched.fetch_add(1, Ordering::Relaxed);
        return;
    }

    match parsed {
        Some(ResponseLine::Error { .. }) => error!("controller: {}", line),
        Some(ResponseLine::MotionDone { .. }) => debug!("controller: {}", line),
        _ => info!("controller: {}", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Completion;

    #[test]
    fn test_handle_motion_done_resolves_and_releases() {
        let ctx = BusContext::new();
        let (tx, rx) = crossbeam_channel::bounded(1);
        ctx.pending.insert(4, tx);
        ctx.motion.acquire();

        handle_line("T done steps=10 id=4\r", &ctx);

        assert_eq!(ctx.motion.outstanding(), 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            Completion {
                ok: true,
                line: "T done steps=10 id=4".to_string()
            }
        );
        assert_eq!(ctx.metrics.snapshot().completions, 1);
    }

    #[test]
    fn test_handle_error_for_unknown_id_counts_unmatched() {
        let ctx = BusContext::new();
        ctx.motion.acquire();
        handle_line("ERR,T,99,stall", &ctx);
        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.unmatched, 1);
        assert_eq!(ctx.motion.outstanding(), 0);
    }

    #[test]
    fn test_non_motion_error_keeps_counter() {
        let ctx = BusContext::new();
        ctx.motion.acquire();
        handle_line("ERR,S,5,bad pin", &ctx);
        assert_eq!(ctx.motion.outstanding(), 1);
    }

    #[test]
    fn test_info_line_goes_to_callback() {
        let ctx = BusContext::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        ctx.callbacks.write().register(
            "ENC",
            Arc::new(move |fields: &[String]| {
                let _ = tx.send(fields.join(","));
            }),
        );
        handle_line("ENC,1,2", &ctx);
        handle_line("", &ctx);
        assert_eq!(rx.try_recv().unwrap(), "1,2");
        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.callbacks_dispatched, 1);
        assert_eq!(snap.lines_received, 1);
    }

    struct RecordingTx(Sender<String>);

    impl TxPort for RecordingTx {
        fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
            let _ = self.0.send(line.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_blocking_command_abandoned_while_draining_is_not_written() {
        let ctx = Arc::new(BusContext::new());
        let config = BusConfig {
            write_delay_ms: 0,
            queue_poll_ms: 1_000,
            ..BusConfig::default()
        };
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (line_tx, line_rx) = crossbeam_channel::unbounded();
        let (waiter, _completion) = crossbeam_channel::bounded(1);
        let (sent_tx, _sent_rx) = crossbeam_channel::bounded(1);

        ctx.motion.acquire();
        ctx.pending.insert(7, waiter);
        queue_tx
            .send(QueuedCommand {
                id: 7,
                command: ControllerCommand::ServoAngle { pin: 3, angle: 90 },
                sent: Some(sent_tx),
            })
            .unwrap();

        let writer = {
            let ctx = ctx.clone();
            std::thread::spawn(move || writer_loop(RecordingTx(line_tx), queue_rx, ctx, config))
        };
        // 写线程进入等待后，调用者放弃，随后运动完成
        std::thread::sleep(Duration::from_millis(100));
        assert!(ctx.pending.remove(7));
        ctx.motion.release();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ctx.metrics.snapshot().skipped, 1);
        assert!(line_rx.try_recv().is_err());

        ctx.stop();
        drop(queue_tx);
        writer.join().unwrap();
        assert_eq!(ctx.metrics.snapshot().written, 0);
    }

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert_eq!(config.write_delay_ms, 50);
        assert_eq!(config.backlog_warn, 10);
        assert_eq!(config.motion_backlog_warn, 3);
    }
}
