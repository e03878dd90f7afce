//! Builder 模式实现
//!
//! 根据配置选择串口后端（真实 TTY 或模拟控制器）并启动命令总线。

use crate::bus::CommandBus;
use crate::error::DriverError;
use crate::pipeline::BusConfig;
use sorter_serial::{SimConfig, SimulatedController};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// 串口后端选择
#[derive(Debug, Clone)]
pub enum BusBackend {
    /// 真实串口
    Serial { path: PathBuf, baud: u32 },
    /// 模拟控制器
    Simulated(SimConfig),
}

/// CommandBus Builder（链式构造）
///
/// ```no_run
/// use sorter_driver::BusBuilder;
/// use std::time::Duration;
///
/// let bus = BusBuilder::new()
///     .serial("/dev/ttyACM0", 115200)
///     .reset_delay(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct BusBuilder {
    backend: BusBackend,
    config: BusConfig,
    reset_delay: Duration,
}

impl BusBuilder {
    /// 默认：模拟后端，无复位等待
    pub fn new() -> Self {
        Self {
            backend: BusBackend::Simulated(SimConfig::default()),
            config: BusConfig::default(),
            reset_delay: Duration::ZERO,
        }
    }

    /// 使用真实串口
    pub fn serial(mut self, path: impl Into<PathBuf>, baud: u32) -> Self {
        self.backend = BusBackend::Serial {
            path: path.into(),
            baud,
        };
        self
    }

    /// 使用模拟控制器
    pub fn simulated(mut self, sim: SimConfig) -> Self {
        self.backend = BusBackend::Simulated(sim);
        self
    }

    pub fn backend(mut self, backend: BusBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// 打开串口后等待 MCU 自动复位的时间（仅真实串口）
    pub fn reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    /// 打开后端并启动总线
    ///
    /// # 错误
    /// - `DriverError::Serial`: 串口打开或配置失败
    pub fn build(self) -> Result<CommandBus, DriverError> {
        match self.backend {
            #[cfg(unix)]
            BusBackend::Serial { path, baud } => {
                let port = sorter_serial::TtyPort::open(&path, baud)?;
                if !self.reset_delay.is_zero() {
                    info!(
                        "Waiting {:?} for controller reset on {}",
                        self.reset_delay,
                        path.display()
                    );
                    std::thread::sleep(self.reset_delay);
                }
                let bus = CommandBus::new(port, self.config)?;
                info!("Controller connected on {}", path.display());
                Ok(bus)
            },
            #[cfg(not(unix))]
            BusBackend::Serial { path, .. } => Err(DriverError::Serial(
                sorter_serial::SerialError::Device(format!(
                    "Serial backend unavailable on this platform: {}",
                    path.display()
                )),
            )),
            BusBackend::Simulated(sim) => {
                info!("Using simulated controller (time scale {})", sim.time_scale);
                CommandBus::new(SimulatedController::new(sim), self.config)
            },
        }
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
