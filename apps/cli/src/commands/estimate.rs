//! estimate 命令
//!
//! 按配置的运动参数估算时长，不连接硬件

use super::Axis;
use crate::setup::Options;
use crate::validation;
use anyhow::Result;
use clap::Args;
use sorter_client::{MotionProfile, estimate_move_ms};

#[derive(Args, Debug)]
pub struct EstimateCommand {
    /// 轴
    #[arg(value_enum)]
    pub axis: Axis,

    /// 转动角度（电机轴角度）
    #[arg(short, long, allow_negative_numbers = true, conflicts_with = "steps")]
    pub degrees: Option<f64>,

    /// 微步数
    #[arg(short, long, allow_negative_numbers = true)]
    pub steps: Option<i64>,
}

impl EstimateCommand {
    pub fn execute(&self, options: &Options) -> Result<()> {
        let config = options.load_config()?;
        let section = self.axis.section(&config);
        let steps_per_rev = section.steps_per_rev * section.microstepping;
        let steps = validation::resolve_steps(self.degrees, self.steps, steps_per_rev)?;
        let profile = MotionProfile::from_section(section);
        let ms = estimate_move_ms(steps, &profile);
        println!("⏱️  {} {} 微步: 约 {} ms", self.axis.name(), steps, ms);
        Ok(())
    }
}
