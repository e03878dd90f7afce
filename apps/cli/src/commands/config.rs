//! 配置管理命令

use crate::setup::Options;
use anyhow::{Context, Result, bail};
use clap::Subcommand;
use sorter_tools::SorterConfig;
use std::path::PathBuf;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 写出带出厂值的配置文件
    Init {
        /// 目标文件
        #[arg(default_value = "sorter.toml")]
        path: PathBuf,

        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },

    /// 打印生效的配置（已合并默认值）
    Show,

    /// 校验配置
    Check,
}

impl ConfigCommand {
    pub fn execute(self, options: &Options) -> Result<()> {
        match self {
            ConfigCommand::Init { path, force } => Self::init(path, force, options.simulate),
            ConfigCommand::Show => {
                let config = options.load_config()?;
                print!("{}", config.to_toml_string()?);
                Ok(())
            },
            ConfigCommand::Check => {
                let config = options.load_config()?;
                println!(
                    "✅ 配置有效: {} 层 / {} 个分区, simulate_hardware={}",
                    config.layers.len(),
                    config.chute_geometry.sections_per_layer,
                    config.simulate_hardware
                );
                Ok(())
            },
        }
    }

    fn init(path: PathBuf, force: bool, simulate: bool) -> Result<()> {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        let config = SorterConfig {
            simulate_hardware: simulate,
            ..Default::default()
        };
        config
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("✅ 已写入 {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sorter.toml");

        ConfigCommand::Init {
            path: path.clone(),
            force: false,
        }
        .execute(&Options::default())
        .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[timing]"));

        let again = ConfigCommand::Init {
            path: path.clone(),
            force: false,
        }
        .execute(&Options::default());
        assert!(again.is_err());

        ConfigCommand::Init { path, force: true }
            .execute(&Options::default())
            .unwrap();
    }

    #[test]
    fn test_written_config_round_trips_with_simulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        let options = Options {
            config: Some(path.clone()),
            simulate: true,
        };
        ConfigCommand::Init {
            path: path.clone(),
            force: false,
        }
        .execute(&options)
        .unwrap();

        let loaded = Options {
            config: Some(path),
            simulate: false,
        }
        .load_config()
        .unwrap();
        assert!(loaded.simulate_hardware);
        assert_eq!(loaded, SorterConfig {
            simulate_hardware: true,
            ..Default::default()
        });
    }
}
