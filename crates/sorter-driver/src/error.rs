//! 驱动层错误类型定义

use sorter_protocol::{CommandId, ProtocolError};
use sorter_serial::SerialError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口错误
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// 协议错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 命令通道已关闭（写线程退出或总线已关闭）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 总线未运行
    #[error("Command bus not running")]
    NotRunning,

    /// 超时参数无效
    #[error("Invalid timeout: must be > 0")]
    InvalidTimeout,

    /// 阻塞命令在限定时间内未被写出（前序运动未完成或队列积压）
    #[error("Command {id} was not sent within {waited_ms}ms")]
    NotSent { id: CommandId, waited_ms: u64 },

    /// 阻塞命令已写出，但未在超时内收到完成
    #[error("Command {id} timed out after {timeout_ms}ms")]
    Timeout { id: CommandId, timeout_ms: u64 },

    /// MCU 报告命令失败
    #[error("Command {id} failed: {line}")]
    CommandFailed { id: CommandId, line: String },

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),
}

impl DriverError {
    /// 是否为超时类错误（未写出或未完成）
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. } | DriverError::NotSent { .. })
    }

    /// 对应的命令 ID（如果有）
    pub fn command_id(&self) -> Option<CommandId> {
        match self {
            DriverError::NotSent { id, .. }
            | DriverError::Timeout { id, .. }
            | DriverError::CommandFailed { id, .. } => Some(*id),
            _ => None,
        }
    }
}
