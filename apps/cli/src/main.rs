//! # Sorter CLI
//!
//! 分拣机命令行工具。
//!
//! ```bash
//! # 生成配置文件
//! sorter-cli config init sorter.toml
//!
//! # 运行控制循环（Ctrl-C 退出）
//! sorter-cli --config sorter.toml run
//!
//! # 不接硬件试运行
//! sorter-cli --simulate run --events
//!
//! # 单轴调试
//! sorter-cli --config sorter.toml move chute --degrees 30
//! sorter-cli bin-angle 1 2 0
//! sorter-cli estimate carousel --degrees 90
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod safety;
mod setup;
mod validation;

use commands::{BinAngleCommand, ConfigCommand, EstimateCommand, MoveCommand, RunCommand};

const DEFAULT_LOG_FILTER: &str = "sorter_cli=info,sorter_control=info,sorter_driver=info";

/// Sorter CLI - 分拣机命令行工具
#[derive(Parser, Debug)]
#[command(name = "sorter-cli")]
#[command(about = "Command-line interface for the part sorter", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件（缺省使用出厂配置）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 使用模拟控制器代替串口
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 运行分拣控制循环
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 移动单个步进轴
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 计算料仓对应的滑槽角度
    BinAngle {
        #[command(flatten)]
        args: BinAngleCommand,
    },

    /// 估算运动时长
    Estimate {
        #[command(flatten)]
        args: EstimateCommand,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let options = setup::Options {
        config: cli.config,
        simulate: cli.simulate,
    };

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&options),
        Commands::Run { args } => args.execute(&options),
        Commands::Move { args } => args.execute(&options),
        Commands::BinAngle { args } => args.execute(&options),
        Commands::Estimate { args } => args.execute(&options),
    }
}
