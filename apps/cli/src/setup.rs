//! 各命令共用的启动步骤：加载配置、打开总线、持久化与分拣规则

use anyhow::{Context, Result};
use sorter_driver::{BusBuilder, BusConfig, CommandBus};
use sorter_serial::SimConfig;
use sorter_tools::{
    BusSection, JsonFileStore, JsonSortingProfile, MachineStore, MemoryStore, SorterConfig,
    SortingProfile, StaticSortingProfile,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 全局命令行选项
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config: Option<PathBuf>,
    pub simulate: bool,
}

impl Options {
    /// 读取配置文件（或出厂配置），应用 `--simulate` 后再校验
    pub fn load_config(&self) -> Result<SorterConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str::<SorterConfig>(&content)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            },
            None => SorterConfig::default(),
        };
        if self.simulate {
            config.simulate_hardware = true;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

pub fn bus_config(section: &BusSection) -> BusConfig {
    BusConfig {
        write_delay_ms: section.write_delay_ms,
        max_send_wait_ms: section.max_send_wait_ms,
        ..Default::default()
    }
}

/// 按配置打开串口或模拟控制器并启动总线
pub fn open_bus(config: &SorterConfig) -> Result<Arc<CommandBus>> {
    let builder = BusBuilder::new().config(bus_config(&config.bus));
    let builder = if config.simulate_hardware {
        builder.simulated(SimConfig {
            time_scale: config.bus.sim_time_scale,
            ..Default::default()
        })
    } else {
        let port = config
            .bus
            .port
            .as_ref()
            .context("bus.port is not configured")?;
        builder
            .serial(port, config.bus.baud)
            .reset_delay(Duration::from_millis(config.bus.reset_delay_ms))
    };
    let bus = builder.build().context("Failed to start command bus")?;
    Ok(Arc::new(bus))
}

/// 模拟硬件时使用内存存储，避免模拟位置写进真实机器的状态文件
pub fn open_store(config: &SorterConfig) -> Result<Arc<dyn MachineStore>> {
    if config.simulate_hardware {
        info!("Simulated hardware: machine state kept in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = JsonFileStore::open(&config.store_path).with_context(|| {
        format!("Failed to open machine store {}", config.store_path.display())
    })?;
    Ok(Arc::new(store))
}

pub fn load_profile(config: &SorterConfig) -> Result<Arc<dyn SortingProfile>> {
    match &config.sorting_profile_path {
        Some(path) => {
            let profile = JsonSortingProfile::load(path).with_context(|| {
                format!("Failed to load sorting profile {}", path.display())
            })?;
            info!(
                "Loaded sorting profile {:?} ({} parts)",
                profile.name().unwrap_or("unnamed"),
                profile.part_count()
            );
            Ok(Arc::new(profile))
        },
        None => {
            info!("No sorting profile configured, every piece goes to misc");
            Ok(Arc::new(StaticSortingProfile::new()))
        },
    }
}
