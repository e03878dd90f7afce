use crate::error::DriverError;
use sorter_protocol::{CommandId, ControllerCommand};
use std::time::Duration;

/// 命令出口
///
/// 轴与滑槽只依赖这个 trait，真实实现为 [`CommandBus`](crate::CommandBus)。
pub trait CommandSink: Send + Sync {
    /// 入队并立即返回命令 ID（Fire-and-Forget）
    ///
    /// # 错误
    /// - `DriverError::NotRunning`: 总线已关闭
    fn submit(&self, command: ControllerCommand) -> Result<CommandId, DriverError>;

    /// 入队并等待完成
    ///
    /// 超时从命令实际写出之后开始计算。成功时返回 MCU 的完成行。
    ///
    /// # 错误
    /// - `DriverError::InvalidTimeout`: `timeout` 为 0
    /// - `DriverError::NotSent`: 命令没有在限定时间内写出
    /// - `DriverError::Timeout`: 写出后超时
    /// - `DriverError::CommandFailed`: MCU 报告失败
    fn submit_blocking(
        &self,
        command: ControllerCommand,
        timeout: Duration,
    ) -> Result<String, DriverError>;

    /// 总线是否仍在运行
    fn is_running(&self) -> bool;
}
