//! 移动命令
//!
//! 单轴阻塞运动，位置写入持久化存储

use super::Axis;
use crate::safety;
use crate::setup::{self, Options};
use crate::validation;
use anyhow::{Context, Result};
use clap::Args;
use sorter_client::{MoveCompletion, Stepper, StepperSettings};
use sorter_driver::CommandSink;
use std::sync::Arc;
use std::time::Duration;

/// 移动命令参数
#[derive(Args, Debug)]
pub struct MoveCommand {
    /// 轴
    #[arg(value_enum)]
    pub axis: Axis,

    /// 转动角度（电机轴角度，可为负）
    #[arg(short, long, allow_negative_numbers = true, conflicts_with = "steps")]
    pub degrees: Option<f64>,

    /// 微步数（可为负）
    #[arg(short, long, allow_negative_numbers = true)]
    pub steps: Option<i64>,

    /// 在估算时长之外额外等待的超时余量（毫秒）
    #[arg(long, default_value_t = 2_000)]
    pub timeout_buffer_ms: u64,

    /// 跳过确认提示
    #[arg(long)]
    pub force: bool,
}

impl MoveCommand {
    pub fn execute(&self, options: &Options) -> Result<()> {
        let config = options.load_config()?;
        let settings = StepperSettings::from_section(self.axis.name(), self.axis.section(&config));
        let steps_per_rev = settings.steps_per_rev * settings.microstepping;
        let steps = validation::resolve_steps(self.degrees, self.steps, steps_per_rev)?;

        if safety::requires_confirmation(steps, steps_per_rev, self.force)
            && !safety::confirm_large_move(self.axis.name(), steps, steps_per_rev)?
        {
            println!("❌ 已取消");
            return Ok(());
        }

        let bus = setup::open_bus(&config)?;
        let store = setup::open_store(&config)?;
        let sink: Arc<dyn CommandSink> = bus.clone();
        let mut stepper = Stepper::new(settings, sink, store)
            .with_context(|| format!("Failed to initialise {} stepper", self.axis.name()))?;

        stepper.enable()?;
        let estimated_ms = stepper.estimate_move_ms(steps);
        let timeout = Duration::from_millis(estimated_ms + self.timeout_buffer_ms);
        println!(
            "🔄 {}: {} 微步（预计 {} ms）",
            self.axis.name(),
            steps,
            estimated_ms
        );
        let done = stepper
            .move_steps_blocking(steps, timeout)
            .with_context(|| format!("{} move failed", self.axis.name()))?;

        match done {
            MoveCompletion::Done { attempts, .. } => println!(
                "✅ 完成（尝试 {} 次），当前位置 {} 微步 / {:.1}°",
                attempts,
                stepper.position_steps(),
                stepper.position_degrees()
            ),
            MoveCompletion::Skipped => println!("ℹ️  零步运动，未发送命令"),
        }
        bus.close();
        Ok(())
    }
}
