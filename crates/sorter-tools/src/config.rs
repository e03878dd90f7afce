//! # 分拣机配置
//!
//! 整机配置以 TOML 文件保存。每个段都实现了 `Default`，缺失的段或字段回落到
//! 出厂值，所以只写几行的配置文件也是合法的。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 整机配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    /// 持久化文件（轴位置、舵机角度、料仓分类）
    pub store_path: PathBuf,

    /// 分拣规则文件；缺省时所有零件进入 "misc"
    pub sorting_profile_path: Option<PathBuf>,

    /// 滑槽只计算并记录，不实际运动
    pub simulate_chute: bool,

    /// 使用模拟控制器代替真实串口
    pub simulate_hardware: bool,

    pub bus: BusSection,

    #[serde(default = "StepperSection::carousel")]
    pub carousel: StepperSection,

    #[serde(default = "StepperSection::chute")]
    pub chute: StepperSection,

    pub feeder: FeederSection,

    pub chute_geometry: ChuteGeometrySection,

    pub doors: DoorSection,

    #[serde(default = "LayerSection::default_layers")]
    pub layers: Vec<LayerSection>,

    pub timing: TimingSection,

    pub detection: DetectionSection,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data.json"),
            sorting_profile_path: None,
            simulate_chute: false,
            simulate_hardware: false,
            bus: BusSection::default(),
            carousel: StepperSection::carousel(),
            chute: StepperSection::chute(),
            feeder: FeederSection::default(),
            chute_geometry: ChuteGeometrySection::default(),
            doors: DoorSection::default(),
            layers: LayerSection::default_layers(),
            timing: TimingSection::default(),
            detection: DetectionSection::default(),
        }
    }
}

impl SorterConfig {
    /// 从 TOML 文件加载并校验
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SorterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 检查跨字段约束
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, stepper) in [
            ("carousel", &self.carousel),
            ("chute", &self.chute),
            ("feeder", &self.feeder.stepper),
        ] {
            stepper
                .validate()
                .map_err(|reason| ConfigError::Invalid(format!("[{}] {}", name, reason)))?;
        }

        let geometry = &self.chute_geometry;
        if geometry.gear_ratio <= 0.0 {
            return Err(ConfigError::Invalid(
                "chute_geometry.gear_ratio must be positive".into(),
            ));
        }
        if geometry.sections_per_layer == 0 {
            return Err(ConfigError::Invalid(
                "chute_geometry.sections_per_layer must be at least 1".into(),
            ));
        }
        let section_width = 360.0 / geometry.sections_per_layer as f64;
        if geometry.pillar_width_deg < 0.0 || geometry.pillar_width_deg >= section_width {
            return Err(ConfigError::Invalid(format!(
                "chute_geometry.pillar_width_deg must be in [0, {})",
                section_width
            )));
        }

        if self.layers.is_empty() {
            return Err(ConfigError::Invalid("at least one [[layers]] entry is required".into()));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.bins_per_section.len() != geometry.sections_per_layer {
                return Err(ConfigError::Invalid(format!(
                    "layers[{}] has {} sections, expected {}",
                    index,
                    layer.bins_per_section.len(),
                    geometry.sections_per_layer
                )));
            }
            if layer.bins_per_section.contains(&0) {
                return Err(ConfigError::Invalid(format!(
                    "layers[{}] has a section without bins",
                    index
                )));
            }
        }

        if self.timing.identify_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timing.identify_timeout_ms must be positive".into(),
            ));
        }

        if self.bus.port.is_none() && !self.simulate_hardware {
            return Err(ConfigError::Invalid(
                "bus.port is required unless simulate_hardware is set".into(),
            ));
        }
        Ok(())
    }
}

/// 串口与总线节奏
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// 串口设备路径
    pub port: Option<PathBuf>,
    pub baud: u32,
    /// 相邻两条命令之间的最小间隔
    pub write_delay_ms: u64,
    /// 阻塞命令等待写出的上限
    pub max_send_wait_ms: u64,
    /// 打开串口后等待 MCU 复位
    pub reset_delay_ms: u64,
    /// 模拟控制器的时间缩放（仅 simulate_hardware）
    pub sim_time_scale: f64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115200,
            write_delay_ms: 50,
            max_send_wait_ms: 30_000,
            reset_delay_ms: 2_000,
            sim_time_scale: 1.0,
        }
    }
}

/// 步进电机接线与默认运动参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperSection {
    pub step_pin: u8,
    pub dir_pin: u8,
    pub enable_pin: u8,
    pub steps_per_rev: u32,
    pub microstepping: u32,
    /// 巡航阶段每步延时（µs）
    pub delay_us: u32,
    /// 加速起始延时（µs），缺省为 2 × delay_us
    pub accel_start_delay_us: Option<u32>,
    pub accel_steps: u32,
    /// 缺省与 accel_steps 相同
    pub decel_steps: Option<u32>,
}

impl Default for StepperSection {
    fn default() -> Self {
        Self {
            step_pin: 0,
            dir_pin: 0,
            enable_pin: 0,
            steps_per_rev: 200,
            microstepping: 8,
            delay_us: 400,
            accel_start_delay_us: None,
            accel_steps: 24,
            decel_steps: None,
        }
    }
}

impl StepperSection {
    pub fn carousel() -> Self {
        Self {
            step_pin: 36,
            dir_pin: 34,
            enable_pin: 30,
            delay_us: 1000,
            ..Default::default()
        }
    }

    pub fn chute() -> Self {
        Self {
            step_pin: 26,
            dir_pin: 28,
            enable_pin: 24,
            delay_us: 400,
            ..Default::default()
        }
    }

    pub fn feeder() -> Self {
        Self {
            step_pin: 54,
            dir_pin: 55,
            enable_pin: 38,
            delay_us: 600,
            ..Default::default()
        }
    }

    pub fn effective_accel_start_delay_us(&self) -> u32 {
        self.accel_start_delay_us
            .unwrap_or_else(|| self.delay_us.saturating_mul(2))
    }

    pub fn effective_decel_steps(&self) -> u32 {
        self.decel_steps.unwrap_or(self.accel_steps)
    }

    fn validate(&self) -> Result<(), String> {
        if self.steps_per_rev == 0 || self.microstepping == 0 {
            return Err("steps_per_rev and microstepping must be positive".into());
        }
        if self.delay_us == 0 {
            return Err("delay_us must be positive".into());
        }
        if self.step_pin == self.dir_pin {
            return Err(format!("step_pin and dir_pin are both {}", self.step_pin));
        }
        Ok(())
    }
}

/// 上料器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederSection {
    #[serde(default = "StepperSection::feeder")]
    pub stepper: StepperSection,
    /// 每次脉冲的步数
    pub steps_per_pulse: u32,
    /// 反向运行（电机装配方向）
    pub reverse: bool,
    /// 两次脉冲之间的最小间隔
    pub pulse_gap_ms: u64,
}

impl Default for FeederSection {
    fn default() -> Self {
        Self {
            stepper: StepperSection::feeder(),
            steps_per_pulse: 200,
            reverse: true,
            pulse_gap_ms: 1_500,
        }
    }
}

/// 滑槽几何
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChuteGeometrySection {
    /// 步进电机角度 / 滑槽角度
    pub gear_ratio: f64,
    pub sections_per_layer: usize,
    /// 相邻分区之间立柱占用的角度
    pub pillar_width_deg: f64,
}

impl Default for ChuteGeometrySection {
    fn default() -> Self {
        Self {
            gear_ratio: 4.0,
            sections_per_layer: 6,
            pillar_width_deg: 2.5,
        }
    }
}

/// 层门舵机角度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorSection {
    pub open_angle: i32,
    pub closed_angle: i32,
}

impl Default for DoorSection {
    fn default() -> Self {
        Self {
            open_angle: 0,
            closed_angle: 72,
        }
    }
}

/// 一层料仓
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSection {
    /// 层门舵机引脚
    pub servo_pin: u8,
    /// 每个分区的料仓数
    pub bins_per_section: Vec<usize>,
}

impl LayerSection {
    pub fn default_layers() -> Vec<LayerSection> {
        vec![
            LayerSection {
                servo_pin: 2,
                bins_per_section: vec![2; 6],
            },
            LayerSection {
                servo_pin: 3,
                bins_per_section: vec![2; 6],
            },
            LayerSection {
                servo_pin: 4,
                bins_per_section: vec![3; 6],
            },
        ]
    }
}

/// 状态机延时（毫秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    /// 进入检测后等待画面稳定再取基准
    pub detection_settle_ms: u64,
    /// 触发必须持续的时长
    pub detection_hold_ms: u64,
    /// 拍照前等待转盘静止
    pub snapping_settle_ms: u64,
    /// 层门动作后等待
    pub door_settle_ms: u64,
    /// 滑槽运动前等待
    pub pre_move_settle_ms: u64,
    /// 滑槽阻塞运动在估算时长之上的余量
    pub chute_move_buffer_ms: u64,
    /// 滑槽到位后等待零件落下
    pub chute_settle_ms: u64,
    /// 转盘阻塞运动在估算时长之上的余量
    pub rotate_timeout_buffer_ms: u64,
    /// 转盘每次转动的角度
    pub rotate_degrees: f64,
    /// 识别服务未回调时，超过该时长记为 unknown
    pub identify_timeout_ms: u64,
    /// "仍在等待" 日志的最小间隔
    pub waiting_log_interval_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            detection_settle_ms: 1_000,
            detection_hold_ms: 1_000,
            snapping_settle_ms: 2_000,
            door_settle_ms: 1_500,
            pre_move_settle_ms: 5_000,
            chute_move_buffer_ms: 5_000,
            chute_settle_ms: 500,
            rotate_timeout_buffer_ms: 3_000,
            rotate_degrees: 90.0,
            identify_timeout_ms: 10_000,
            waiting_log_interval_ms: 1_000,
        }
    }
}

/// 运动检测阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    pub trigger_score: f64,
    pub min_hot_pixels: u32,
    /// 上料平台区域（像素坐标）
    pub platform_corners: Vec<[f64; 2]>,
    /// 画面尺寸 [宽, 高]
    pub frame_shape: [u32; 2],
    /// 单像素差分阈值（灰度级）
    pub pixel_thresh: u8,
    /// 差分图平滑核（奇数）
    pub blur_kernel: usize,
    /// 基线取平均的帧数
    pub baseline_frames: usize,
    /// 当前画面取平均的帧数
    pub current_frames: usize,
}

impl Default for DetectionSection {
    fn default() -> Self {
        Self {
            trigger_score: 17.0,
            min_hot_pixels: 50,
            platform_corners: Vec::new(),
            frame_shape: [1920, 1080],
            pixel_thresh: 8,
            blur_kernel: 5,
            baseline_frames: 10,
            current_frames: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated() -> SorterConfig {
        SorterConfig {
            simulate_hardware: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_pins() {
        let config = SorterConfig::default();
        assert_eq!(config.carousel.step_pin, 36);
        assert_eq!(config.carousel.delay_us, 1000);
        assert_eq!(config.chute.enable_pin, 24);
        assert_eq!(config.chute.effective_accel_start_delay_us(), 800);
        assert_eq!(config.chute.effective_decel_steps(), 24);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = SorterConfig::from_toml_str(
            r#"
            simulate_hardware = true

            [chute_geometry]
            gear_ratio = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(config.chute_geometry.gear_ratio, 5.0);
        assert_eq!(config.chute_geometry.sections_per_layer, 6);
        assert_eq!(config.carousel, StepperSection::carousel());
        assert_eq!(config.timing.chute_move_buffer_ms, 5_000);
        assert_eq!(config.layers.len(), 3);
    }

    #[test]
    fn test_serial_port_required_without_simulation() {
        let err = SorterConfig::from_toml_str("").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = SorterConfig::from_toml_str(
            r#"
            [bus]
            port = "/dev/ttyACM0"
            "#,
        )
        .unwrap();
        assert_eq!(config.bus.port, Some(PathBuf::from("/dev/ttyACM0")));
        assert_eq!(config.bus.baud, 115200);
    }

    #[test]
    fn test_layer_section_count_must_match_geometry() {
        let mut config = simulated();
        config.layers[0].bins_per_section = vec![2; 5];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_section_rejected() {
        let mut config = simulated();
        config.layers[1].bins_per_section[3] = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pillar_wider_than_section_rejected() {
        let mut config = simulated();
        config.chute_geometry.pillar_width_deg = 60.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_identify_timeout_rejected() {
        let mut config = simulated();
        assert_eq!(config.timing.identify_timeout_ms, 10_000);
        config.timing.identify_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_string_round_trip() {
        let mut config = simulated();
        config.bus.port = Some(PathBuf::from("/dev/ttyUSB1"));
        config.feeder.steps_per_pulse = 120;
        let text = config.to_toml_string().unwrap();
        let parsed = SorterConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
