//! 轴层接口
//!
//! 本模块把物理单位（角度、料仓地址）转换为 MCU 命令：
//! - `Stepper` - 步进电机（微步换算、位置持久化、阻塞运动重试）
//! - `Servo` - 层门舵机
//! - `MotionProfile` - 梯形加减速参数与运动时长估算
//! - `DistributionLayout` - 料仓布局与分类分配
//! - `Chute` - 滑槽定位（料仓地址 → 角度 → 步进增量）
//!
//! 所有命令都经过 [`CommandSink`](sorter_driver::CommandSink)，测试时可以替换为脚本化实现。

pub mod chute;
mod error;
pub mod layout;
pub mod motion;
pub mod servo;
pub mod stepper;

#[cfg(test)]
pub(crate) mod test_support;

pub use chute::{Chute, ChuteGeometry, bin_angle};
pub use error::ClientError;
pub use layout::{Bin, BinAddress, DistributionLayout, Layer, Section};
pub use motion::{MotionProfile, estimate_move_ms};
pub use servo::{DoorAngles, Servo};
pub use stepper::{MoveCompletion, RetryPolicy, Stepper, StepperPins, StepperSettings};
