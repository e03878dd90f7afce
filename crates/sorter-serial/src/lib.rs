//! # Sorter Serial Port Layer
//!
//! 串口硬件抽象层，为命令总线提供统一的按行读写接口。
//!
//! ## 后端
//!
//! - [`TtyPort`]（Unix）：真实串口，通过 termios 配置为原始模式
//! - [`SimulatedController`]：无硬件模拟控制器，按运动时长回复完成行
//!
//! 命令总线需要在两个线程中同时读写，因此所有后端都实现 [`SplittablePort`]，
//! 分离出独立的 [`RxPort`] 与 [`TxPort`]。

use std::time::Duration;
use thiserror::Error;

pub mod line;
pub mod sim;

#[cfg(unix)]
pub mod tty;

pub use line::LineReader;
pub use sim::{SimConfig, SimEvent, SimHandle, SimRxPort, SimTxPort, SimulatedController};

#[cfg(unix)]
pub use tty::{TtyPort, TtyRxPort, TtyTxPort};

/// 串口层统一错误类型
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(String),
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("Read timeout")]
    Timeout,
    #[error("Port closed")]
    Closed,
}

impl SerialError {
    /// 是否为可忽略的超时（读线程应继续轮询）
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SerialError::Timeout)
    }
}

/// 完整的串口（读写未分离）
pub trait SerialPort {
    /// 写入一行（调用方负责结尾换行），写完后刷新
    fn write_line(&mut self, line: &str) -> Result<(), SerialError>;

    /// 读取一行（不含换行符）
    ///
    /// 在读超时内没有完整行时返回 `SerialError::Timeout`。
    fn read_line(&mut self) -> Result<String, SerialError>;

    /// 设置读超时
    fn set_read_timeout(&mut self, _timeout: Duration) {}

    /// 非阻塞读取
    fn try_read_line(&mut self) -> Result<Option<String>, SerialError> {
        match self.read_line() {
            Ok(line) => Ok(Some(line)),
            Err(SerialError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 只读端
pub trait RxPort {
    /// 读取一行，超时返回 `SerialError::Timeout`
    fn read_line(&mut self) -> Result<String, SerialError>;
}

/// 只写端
pub trait TxPort {
    /// 写入一行并刷新
    fn write_line(&mut self, line: &str) -> Result<(), SerialError>;
}

/// 可分离为独立读写端的串口
pub trait SplittablePort: SerialPort {
    type RxPort: RxPort;
    type TxPort: TxPort;

    /// 分离为 RX 与 TX（消费 `self`）
    fn split(self) -> Result<(Self::RxPort, Self::TxPort), SerialError>;
}
