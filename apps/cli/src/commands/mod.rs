//! 命令定义和实现

pub mod bin_angle;
pub mod config;
pub mod estimate;
pub mod r#move;
pub mod run;

pub use bin_angle::BinAngleCommand;
pub use config::ConfigCommand;
pub use estimate::EstimateCommand;
pub use r#move::MoveCommand;
pub use run::RunCommand;

use clap::ValueEnum;
use sorter_tools::{SorterConfig, StepperSection};

/// 步进轴
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Axis {
    Carousel,
    Chute,
    Feeder,
}

impl Axis {
    /// 轴名，同时也是持久化键
    pub fn name(self) -> &'static str {
        match self {
            Axis::Carousel => "carousel",
            Axis::Chute => "chute",
            Axis::Feeder => "feeder",
        }
    }

    pub fn section(self, config: &SorterConfig) -> &StepperSection {
        match self {
            Axis::Carousel => &config.carousel,
            Axis::Chute => &config.chute,
            Axis::Feeder => &config.feeder.stepper,
        }
    }
}
