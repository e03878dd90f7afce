//! 命令总线（驱动层）
//!
//! 本模块独占一条串口，把上层的命令请求变成线格式并发送给 MCU：
//! - 写线程：FIFO 队列，每条命令之间保持最小间隔
//! - 读线程：解析响应行，按命令 ID 唤醒阻塞调用者，或按标签分发回调
//! - 运动计数：阻塞命令写出前等待所有在途 `T` 命令完成
//!
//! 上层（轴、滑槽）通过 [`CommandSink`] trait 使用总线，便于在测试中替换。

mod builder;
mod bus;
mod context;
mod error;
pub mod hooks;
pub mod metrics;
pub mod pipeline;
mod sink;

pub use builder::{BusBuilder, BusBackend};
pub use bus::CommandBus;
pub use context::{BusContext, Completion, MotionGate, PendingTable};
pub use error::DriverError;
pub use hooks::{CallbackRegistry, LineCallback};
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use pipeline::{BusConfig, QueuedCommand, handle_line, reader_loop, writer_loop};
pub use sink::CommandSink;

pub use sorter_protocol::{CommandId, ControllerCommand};
