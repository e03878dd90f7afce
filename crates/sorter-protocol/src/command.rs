//! 下行命令构建
//!
//! 所有发往 MCU 的命令最终都被编码为一行 ASCII 文本：
//!
//! ```text
//! <id>|<tag>,<arg1>,<arg2>,...\n
//! ```

use crate::{CommandId, MOTION_TAG, ProtocolError};
use smallvec::SmallVec;
use std::fmt;

/// 单个命令参数
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Arg {
    /// 文本参数（命令标签等）
    Text(String),
    /// 整数参数
    Int(i64),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(s) => f.write_str(s),
            Arg::Int(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<u8> for Arg {
    fn from(value: u8) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value as i64)
    }
}

/// 参数列表
///
/// 运动命令恰好 8 个参数（标签 + 7 个数值），栈上预留 8 个位置，避免堆分配。
pub type CommandArgs = SmallVec<[Arg; 8]>;

/// 运动命令参数（`T` 命令）
///
/// 对应线格式：`T,stepPin,dirPin,steps,delayUs,accelStartDelayUs,accelSteps,decelSteps`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionArgs {
    /// STEP 引脚
    pub step_pin: u8,
    /// DIR 引脚
    pub dir_pin: u8,
    /// 微步数（带符号，符号决定方向）
    pub steps: i64,
    /// 巡航阶段每步延迟（微秒）
    pub delay_us: u32,
    /// 加速起始延迟（微秒）
    pub accel_start_delay_us: u32,
    /// 加速区步数
    pub accel_steps: u32,
    /// 减速区步数
    pub decel_steps: u32,
}

/// MCU 命令
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControllerCommand {
    /// 步进电机运动（`T`），完成后 MCU 回复 `T done ... id=<id>`
    Move(MotionArgs),
    /// 引脚模式配置（`P,pin,mode`），无完成通知
    PinMode { pin: u8, mode: u8 },
    /// 数字输出（`D,pin,value`）
    DigitalWrite { pin: u8, value: u8 },
    /// 舵机角度（`S,pin,angle`）
    ServoAngle { pin: u8, angle: i32 },
    /// 原始参数列表（第一个参数为标签）
    Raw(CommandArgs),
}

impl ControllerCommand {
    /// 从原始参数构建命令
    ///
    /// # 错误
    /// - `ProtocolError::InvalidArgument`: 参数列表为空或标签不是文本
    pub fn raw(args: impl IntoIterator<Item = Arg>) -> Result<Self, ProtocolError> {
        let args: CommandArgs = args.into_iter().collect();
        match args.first() {
            Some(Arg::Text(tag)) if !tag.is_empty() && !tag.contains(['|', ',', '\n']) => {
                Ok(ControllerCommand::Raw(args))
            },
            Some(other) => Err(ProtocolError::InvalidArgument {
                value: other.to_string(),
                reason: "command tag must be non-empty text without separators",
            }),
            None => Err(ProtocolError::InvalidArgument {
                value: String::new(),
                reason: "command needs at least a tag",
            }),
        }
    }

    /// 命令标签（线格式中的第一个参数）
    pub fn tag(&self) -> &str {
        match self {
            ControllerCommand::Move(_) => MOTION_TAG,
            ControllerCommand::PinMode { .. } => "P",
            ControllerCommand::DigitalWrite { .. } => "D",
            ControllerCommand::ServoAngle { .. } => "S",
            ControllerCommand::Raw(args) => match args.first() {
                Some(Arg::Text(tag)) => tag.as_str(),
                _ => "",
            },
        }
    }

    /// 是否为运动类命令（会占用 MCU 的 T 计数）
    #[inline]
    pub fn is_motion(&self) -> bool {
        self.tag() == MOTION_TAG
    }

    /// 展开为参数列表
    pub fn args(&self) -> CommandArgs {
        let mut out = CommandArgs::new();
        match self {
            ControllerCommand::Move(m) => {
                out.push(Arg::from(MOTION_TAG));
                out.push(m.step_pin.into());
                out.push(m.dir_pin.into());
                out.push(m.steps.into());
                out.push(m.delay_us.into());
                out.push(m.accel_start_delay_us.into());
                out.push(m.accel_steps.into());
                out.push(m.decel_steps.into());
            },
            ControllerCommand::PinMode { pin, mode } => {
                out.push(Arg::from("P"));
                out.push((*pin).into());
                out.push((*mode).into());
            },
            ControllerCommand::DigitalWrite { pin, value } => {
                out.push(Arg::from("D"));
                out.push((*pin).into());
                out.push((*value).into());
            },
            ControllerCommand::ServoAngle { pin, angle } => {
                out.push(Arg::from("S"));
                out.push((*pin).into());
                out.push((*angle).into());
            },
            ControllerCommand::Raw(args) => out.extend(args.iter().cloned()),
        }
        out
    }
}

impl fmt::Display for ControllerCommand {
    /// 输出逗号分隔的参数（不含 ID）
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

/// 编码为完整的一行（含结尾换行）
///
/// ```
/// use sorter_protocol::{ControllerCommand, encode_line};
///
/// let cmd = ControllerCommand::DigitalWrite { pin: 30, value: 0 };
/// assert_eq!(encode_line(7, &cmd), "7|D,30,0\n");
/// ```
pub fn encode_line(id: CommandId, command: &ControllerCommand) -> String {
    format!("{}|{}\n", id, command)
}
