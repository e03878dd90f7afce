//! 上行响应行解析
//!
//! MCU 返回的每一行被归为三类：
//!
//! - 运动完成：`T done ... id=<id>`
//! - 错误：`ERR,<kind>,<id>,<detail>`
//! - 其他：按第一个逗号字段作为标签的信息行

use crate::{CommandId, MOTION_TAG, ProtocolError};

const MOTION_DONE_PREFIX: &str = "T done ";
const ERROR_PREFIX: &str = "ERR,";

/// 解析后的响应行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    /// 运动命令完成
    ///
    /// `id` 缺失或无法解析时为 `None`（仍然计入 T 计数递减）。
    MotionDone { id: Option<CommandId> },
    /// MCU 报告的命令失败
    Error {
        /// 失败命令的类型标签（如 `T`）
        kind: String,
        /// 失败命令 ID（无法解析时为 `None`）
        id: Option<CommandId>,
        /// 错误详情（可能包含逗号）
        detail: String,
    },
    /// 信息行
    Info {
        /// 第一个逗号字段
        tag: String,
        /// 其余字段
        fields: Vec<String>,
    },
}

impl ResponseLine {
    /// 解析一行（调用方应已去除行尾换行）
    ///
    /// # 错误
    /// - `ProtocolError::EmptyLine`: 空行
    /// - `ProtocolError::MissingField`: `ERR,` 行字段不足 4 个
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }

        if line.starts_with(ERROR_PREFIX) {
            let mut parts = line.splitn(4, ',');
            let _ = parts.next();
            let (Some(kind), Some(id), Some(detail)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(ProtocolError::MissingField {
                    field: "detail",
                    line: line.to_string(),
                });
            };
            return Ok(ResponseLine::Error {
                kind: kind.to_string(),
                id: id.trim().parse().ok(),
                detail: detail.to_string(),
            });
        }

        if line.starts_with(MOTION_DONE_PREFIX) {
            let id = line
                .split_whitespace()
                .find_map(|token| token.strip_prefix("id="))
                .and_then(|v| v.parse().ok());
            return Ok(ResponseLine::MotionDone { id });
        }

        let mut fields = line.split(',').map(str::to_string);
        let tag = fields.next().unwrap_or_default();
        Ok(ResponseLine::Info {
            tag,
            fields: fields.collect(),
        })
    }

    /// 此行是否释放一个在途 T 命令
    pub fn releases_motion(&self) -> bool {
        match self {
            ResponseLine::MotionDone { .. } => true,
            ResponseLine::Error { kind, .. } => kind == MOTION_TAG,
            ResponseLine::Info { .. } => false,
        }
    }

    /// 此行对应的命令 ID 及其成功与否
    pub fn resolution(&self) -> Option<(CommandId, bool)> {
        match self {
            ResponseLine::MotionDone { id } => id.map(|id| (id, true)),
            ResponseLine::Error { id, .. } => id.map(|id| (id, false)),
            ResponseLine::Info { .. } => None,
        }
    }
}

/// 取一行的回调分发标签（第一个逗号字段）
pub fn dispatch_tag(line: &str) -> &str {
    line.split(',').next().unwrap_or("")
}
