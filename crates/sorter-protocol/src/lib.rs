//! # Sorter Protocol
//!
//! 分拣机运动控制 MCU 的串口行协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `command`: 下行命令构建（`<id>|<args...>\n`）
//! - `response`: 上行响应行解析（`T done ... id=<id>` / `ERR,<kind>,<id>,<detail>`）
//!
//! ## 线格式
//!
//! 协议为 ASCII 文本，每条命令一行：命令 ID 与参数之间以 `|` 分隔，
//! 参数之间以 `,` 分隔。MCU 的响应同样按行返回，只有运动类命令（`T`）
//! 会产生完成通知。

pub mod command;
pub mod response;

pub use command::{Arg, CommandArgs, ControllerCommand, MotionArgs, encode_line};
pub use response::{ResponseLine, dispatch_tag};

use thiserror::Error;

/// 命令 ID
///
/// 由命令总线单调分配，从 [`COMMAND_ID_START`] 开始，超过 [`COMMAND_ID_MAX`] 后回绕。
pub type CommandId = u32;

/// 命令 ID 起始值
pub const COMMAND_ID_START: CommandId = 1;

/// 命令 ID 最大值（超过后回绕到 `COMMAND_ID_START`）
pub const COMMAND_ID_MAX: CommandId = 2_000_000_000;

/// 运动类命令标签
pub const MOTION_TAG: &str = "T";

/// 协议解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty line")]
    EmptyLine,

    #[error("Invalid command id: {0}")]
    InvalidId(String),

    #[error("Missing field {field} in line: {line}")]
    MissingField { field: &'static str, line: String },

    #[error("Invalid argument {value:?}: {reason}")]
    InvalidArgument { value: String, reason: &'static str },
}

/// 计算下一个命令 ID（带回绕）
///
/// ```
/// use sorter_protocol::{COMMAND_ID_MAX, COMMAND_ID_START, next_command_id};
///
/// assert_eq!(next_command_id(1), 2);
/// assert_eq!(next_command_id(COMMAND_ID_MAX), COMMAND_ID_START);
/// ```
#[inline]
pub fn next_command_id(current: CommandId) -> CommandId {
    if current >= COMMAND_ID_MAX {
        COMMAND_ID_START
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_command_id_monotonic() {
        let mut id = COMMAND_ID_START;
        for _ in 0..100 {
            let next = next_command_id(id);
            assert!(next > id);
            id = next;
        }
    }

    #[test]
    fn test_next_command_id_wraps() {
        assert_eq!(next_command_id(COMMAND_ID_MAX - 1), COMMAND_ID_MAX);
        assert_eq!(next_command_id(COMMAND_ID_MAX), COMMAND_ID_START);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidId("abc".to_string());
        assert_eq!(format!("{}", err), "Invalid command id: abc");

        let err = ProtocolError::MissingField {
            field: "id",
            line: "ERR,T".to_string(),
        };
        assert!(format!("{}", err).contains("Missing field id"));
    }
}
