//! 梯形加减速参数与运动时长估算
//!
//! MCU 按下面的规则为每一步计算延时，估算函数逐步复现同样的整数运算：
//!
//! ```text
//! 加速区 i < accel:          d = start - delta * (i + 1) / accel
//! 减速区 i >= n - decel:     d = delay + delta * (k + 1) / decel   (k = i - (n - decel))
//! 其他:                      d = delay
//! ```
//!
//! 每一步耗时 `2 * d` 微秒（高电平 + 低电平），结果向上取整到毫秒。

use sorter_protocol::{ControllerCommand, MotionArgs};
use sorter_tools::StepperSection;

/// 运动参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionProfile {
    /// 巡航每步延时（µs）
    pub delay_us: u32,
    /// 加速起始延时（µs）
    pub accel_start_delay_us: u32,
    pub accel_steps: u32,
    pub decel_steps: u32,
}

impl MotionProfile {
    /// 起始延时为巡航的 2 倍，加减速各 24 步
    pub fn new(delay_us: u32) -> Self {
        Self {
            delay_us,
            accel_start_delay_us: delay_us.saturating_mul(2),
            accel_steps: 24,
            decel_steps: 24,
        }
    }

    pub fn from_section(section: &StepperSection) -> Self {
        Self {
            delay_us: section.delay_us,
            accel_start_delay_us: section.effective_accel_start_delay_us(),
            accel_steps: section.accel_steps,
            decel_steps: section.effective_decel_steps(),
        }
    }

    /// 只替换巡航延时，其余参数不变
    pub fn with_delay(self, delay_us: u32) -> Self {
        Self { delay_us, ..self }
    }

    /// 生成 `T` 命令
    pub fn command(&self, step_pin: u8, dir_pin: u8, steps: i64) -> ControllerCommand {
        ControllerCommand::Move(MotionArgs {
            step_pin,
            dir_pin,
            steps,
            delay_us: self.delay_us,
            accel_start_delay_us: self.accel_start_delay_us,
            accel_steps: self.accel_steps,
            decel_steps: self.decel_steps,
        })
    }

    /// 估算运动时长（毫秒）
    pub fn estimate_ms(&self, steps: i64) -> u64 {
        estimate_move_ms(steps, self)
    }
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self::new(400)
    }
}

/// 估算 `steps` 微步运动的时长（毫秒，向上取整）
///
/// 参数先被规整：延时至少 1µs，起始延时不小于巡航延时；
/// 加减速区之和超过总步数时，两区按总步数对半分（奇数时减速区多一步）。
pub fn estimate_move_ms(steps: i64, profile: &MotionProfile) -> u64 {
    let delay = u64::from(profile.delay_us.max(1));
    let start = u64::from(profile.accel_start_delay_us).max(delay);
    let abs_steps = steps.unsigned_abs();

    let (mut accel_zone, mut decel_zone) =
        (u64::from(profile.accel_steps), u64::from(profile.decel_steps));
    if accel_zone + decel_zone > abs_steps {
        accel_zone = abs_steps / 2;
        decel_zone = abs_steps - accel_zone;
    }

    let delta = start - delay;
    let mut total_us: u64 = 0;
    for i in 0..abs_steps {
        let mut step_delay = delay;
        if delta > 0 && accel_zone > 0 && i < accel_zone {
            step_delay = start - (delta * (i + 1)) / accel_zone;
        }
        if delta > 0 && decel_zone > 0 && i >= abs_steps - decel_zone {
            let k = i - (abs_steps - decel_zone);
            step_delay = delay + (delta * (k + 1)) / decel_zone;
        }
        total_us += step_delay * 2;
    }

    total_us.div_ceil(1000)
}
