//! 步进电机
//!
//! 逻辑位置以微步计，保存在 [`MachineStore`] 中，重启后恢复。
//!
//! - Fire-and-Forget 运动（`move_steps` / `rotate`）在发出命令时就更新位置
//! - 阻塞运动（`move_steps_blocking` / `rotate_blocking`）只在 MCU 确认完成后更新位置，
//!   失败时按 [`RetryPolicy`] 重试

use crate::error::ClientError;
use crate::motion::MotionProfile;
use sorter_driver::{CommandSink, DriverError};
use sorter_protocol::ControllerCommand;
use sorter_tools::{MachineStore, StepperSection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 引脚模式：输出
const PIN_MODE_OUTPUT: u8 = 1;

/// 驱动器使能引脚低有效
const ENABLE_ACTIVE: u8 = 0;
const ENABLE_INACTIVE: u8 = 1;

/// 步进驱动器接线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepperPins {
    pub step: u8,
    pub dir: u8,
    pub enable: u8,
}

/// 阻塞运动的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次失败后的重试次数（总尝试次数 = retries + 1）
    pub retries: u32,
    /// 两次尝试之间的等待
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            delay: Duration::from_millis(250),
        }
    }
}

/// 构造参数
#[derive(Debug, Clone)]
pub struct StepperSettings {
    /// 持久化键
    pub name: String,
    pub pins: StepperPins,
    pub steps_per_rev: u32,
    pub microstepping: u32,
    pub profile: MotionProfile,
    pub retry: RetryPolicy,
}

impl StepperSettings {
    pub fn from_section(name: impl Into<String>, section: &StepperSection) -> Self {
        Self {
            name: name.into(),
            pins: StepperPins {
                step: section.step_pin,
                dir: section.dir_pin,
                enable: section.enable_pin,
            },
            steps_per_rev: section.steps_per_rev,
            microstepping: section.microstepping,
            profile: MotionProfile::from_section(section),
            retry: RetryPolicy::default(),
        }
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// 阻塞运动的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveCompletion {
    /// MCU 确认完成
    Done {
        /// 完成行
        line: String,
        /// 实际尝试次数
        attempts: u32,
    },
    /// 零步运动，没有发送任何命令
    Skipped,
}

impl MoveCompletion {
    pub fn is_skipped(&self) -> bool {
        matches!(self, MoveCompletion::Skipped)
    }
}

/// 步进电机
pub struct Stepper {
    name: String,
    pins: StepperPins,
    total_steps_per_rev: u32,
    profile: MotionProfile,
    retry: RetryPolicy,
    position_steps: i64,
    sink: Arc<dyn CommandSink>,
    store: Arc<dyn MachineStore>,
}

impl std::fmt::Debug for Stepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stepper")
            .field("name", &self.name)
            .field("pins", &self.pins)
            .field("total_steps_per_rev", &self.total_steps_per_rev)
            .field("position_steps", &self.position_steps)
            .finish()
    }
}

impl Stepper {
    /// 恢复持久化位置，配置引脚并使能驱动器
    ///
    /// # 错误
    /// - `ClientError::InvalidLayout`: 每圈微步数为 0
    /// - `ClientError::Driver`: 总线已关闭
    pub fn new(
        settings: StepperSettings,
        sink: Arc<dyn CommandSink>,
        store: Arc<dyn MachineStore>,
    ) -> Result<Self, ClientError> {
        let total_steps_per_rev = settings.steps_per_rev.saturating_mul(settings.microstepping);
        if total_steps_per_rev == 0 {
            return Err(ClientError::InvalidLayout(format!(
                "stepper '{}' has zero steps per revolution",
                settings.name
            )));
        }

        let position_steps = store.stepper_position(&settings.name);
        let pins = settings.pins;
        info!(
            "Initialized stepper '{}' with step={}, dir={}, enable={}, position={}",
            settings.name, pins.step, pins.dir, pins.enable, position_steps
        );

        for pin in [pins.step, pins.dir, pins.enable] {
            sink.submit(ControllerCommand::PinMode {
                pin,
                mode: PIN_MODE_OUTPUT,
            })?;
        }
        sink.submit(ControllerCommand::DigitalWrite {
            pin: pins.enable,
            value: ENABLE_ACTIVE,
        })?;

        Ok(Self {
            name: settings.name,
            pins,
            total_steps_per_rev,
            profile: settings.profile,
            retry: settings.retry,
            position_steps,
            sink,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pins(&self) -> StepperPins {
        self.pins
    }

    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    pub fn total_steps_per_rev(&self) -> u32 {
        self.total_steps_per_rev
    }

    /// 逻辑位置（微步）
    pub fn position_steps(&self) -> i64 {
        self.position_steps
    }

    /// 逻辑位置（度）
    pub fn position_degrees(&self) -> f64 {
        self.steps_to_degrees(self.position_steps)
    }

    /// 角度 → 微步（向零截断）
    pub fn degrees_to_steps(&self, degrees: f64) -> i64 {
        (degrees / 360.0 * f64::from(self.total_steps_per_rev)).trunc() as i64
    }

    pub fn steps_to_degrees(&self, steps: i64) -> f64 {
        steps as f64 * 360.0 / f64::from(self.total_steps_per_rev)
    }

    /// 以默认参数发出运动命令并立即返回
    pub fn move_steps(&mut self, steps: i64) -> Result<(), ClientError> {
        let profile = self.profile;
        self.move_steps_with(steps, &profile)
    }

    /// 以指定参数发出运动命令并立即返回
    ///
    /// 位置在发出时更新，不等待 MCU 确认。
    pub fn move_steps_with(&mut self, steps: i64, profile: &MotionProfile) -> Result<(), ClientError> {
        info!(
            "Stepper '{}' moving {} steps (delay={}us, accel_start={}us, accel_steps={}, decel_steps={}, pos={}->{})",
            self.name,
            steps,
            profile.delay_us,
            profile.accel_start_delay_us,
            profile.accel_steps,
            profile.decel_steps,
            self.position_steps,
            self.position_steps + steps
        );
        self.sink
            .submit(profile.command(self.pins.step, self.pins.dir, steps))?;
        self.commit_position(steps)
    }

    pub fn rotate(&mut self, degrees: f64) -> Result<(), ClientError> {
        let steps = self.degrees_to_steps(degrees);
        info!("Stepper '{}' rotating {}° ({} steps)", self.name, degrees, steps);
        self.move_steps(steps)
    }

    pub fn move_steps_blocking(
        &mut self,
        steps: i64,
        timeout: Duration,
    ) -> Result<MoveCompletion, ClientError> {
        let profile = self.profile;
        self.move_steps_blocking_with(steps, timeout, &profile)
    }

    /// 发出运动命令并等待完成
    ///
    /// 零步直接返回 [`MoveCompletion::Skipped`]，不经过总线。
    /// 失败时按重试策略重发；总线已关闭时不再重试。
    ///
    /// # 错误
    /// - `ClientError::RetriesExhausted`: 所有尝试都失败，携带最后一次错误
    /// - `ClientError::Driver`: 总线不可用
    pub fn move_steps_blocking_with(
        &mut self,
        steps: i64,
        timeout: Duration,
        profile: &MotionProfile,
    ) -> Result<MoveCompletion, ClientError> {
        if steps == 0 {
            info!("Stepper '{}' blocking move of 0 steps skipped", self.name);
            return Ok(MoveCompletion::Skipped);
        }

        info!(
            "Stepper '{}' moving {} steps (blocking, timeout={}ms, pos={}->{})",
            self.name,
            steps,
            timeout.as_millis(),
            self.position_steps,
            self.position_steps + steps
        );

        let total_attempts = self.retry.retries + 1;
        let mut attempt = 0;
        let line = loop {
            attempt += 1;
            let command = profile.command(self.pins.step, self.pins.dir, steps);
            match self.sink.submit_blocking(command, timeout) {
                Ok(line) => break line,
                Err(e @ (DriverError::NotRunning | DriverError::ChannelClosed)) => {
                    return Err(ClientError::Driver(e));
                },
                Err(e) if attempt >= total_attempts => {
                    error!(
                        "Stepper '{}' move failed after {} attempts: {}",
                        self.name, attempt, e
                    );
                    return Err(ClientError::RetriesExhausted {
                        axis: self.name.clone(),
                        attempts: attempt,
                        source: e,
                    });
                },
                Err(e) => {
                    error!(
                        "Stepper '{}' blocking move retry {}/{} after error: {}",
                        self.name, attempt, self.retry.retries, e
                    );
                    if !self.retry.delay.is_zero() {
                        std::thread::sleep(self.retry.delay);
                    }
                },
            }
        };

        self.commit_position(steps)?;
        Ok(MoveCompletion::Done {
            line,
            attempts: attempt,
        })
    }

    pub fn rotate_blocking(
        &mut self,
        degrees: f64,
        timeout: Duration,
    ) -> Result<MoveCompletion, ClientError> {
        let steps = self.degrees_to_steps(degrees);
        self.move_steps_blocking(steps, timeout)
    }

    /// 以默认参数估算运动时长（毫秒）
    pub fn estimate_move_ms(&self, steps: i64) -> u64 {
        self.profile.estimate_ms(steps)
    }

    pub fn estimate_move_degrees_ms(&self, degrees: f64) -> u64 {
        self.estimate_move_ms(self.degrees_to_steps(degrees))
    }

    /// 使能驱动器
    pub fn enable(&self) -> Result<(), ClientError> {
        self.sink.submit(ControllerCommand::DigitalWrite {
            pin: self.pins.enable,
            value: ENABLE_ACTIVE,
        })?;
        Ok(())
    }

    /// 释放驱动器（电机可以手动转动）
    pub fn disable(&self) -> Result<(), ClientError> {
        self.sink.submit(ControllerCommand::DigitalWrite {
            pin: self.pins.enable,
            value: ENABLE_INACTIVE,
        })?;
        Ok(())
    }

    /// 发出零步运动命令，让 MCU 结束当前运动
    pub fn halt(&self) -> Result<(), ClientError> {
        info!("Stepper '{}' halt", self.name);
        self.sink
            .submit(self.profile.command(self.pins.step, self.pins.dir, 0))?;
        Ok(())
    }

    /// 把当前物理位置记为 `steps`（不运动）
    pub fn set_position(&mut self, steps: i64) -> Result<(), ClientError> {
        info!(
            "Stepper '{}' position reset {} -> {}",
            self.name, self.position_steps, steps
        );
        self.position_steps = steps;
        self.store.set_stepper_position(&self.name, steps)?;
        Ok(())
    }

    fn commit_position(&mut self, steps: i64) -> Result<(), ClientError> {
        self.position_steps += steps;
        self.store
            .set_stepper_position(&self.name, self.position_steps)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedSink, Sent};
    use sorter_protocol::MotionArgs;
    use sorter_tools::MemoryStore;

    fn settings(microstepping: u32) -> StepperSettings {
        StepperSettings {
            name: "carousel".to_string(),
            pins: StepperPins {
                step: 36,
                dir: 34,
                enable: 30,
            },
            steps_per_rev: 200,
            microstepping,
            profile: MotionProfile::new(1000),
            retry: RetryPolicy {
                retries: 10,
                delay: Duration::ZERO,
            },
        }
    }

    fn stepper(microstepping: u32) -> (Stepper, Arc<ScriptedSink>, Arc<MemoryStore>) {
        let sink = Arc::new(ScriptedSink::new());
        let store = Arc::new(MemoryStore::new());
        let stepper = Stepper::new(settings(microstepping), sink.clone(), store.clone()).unwrap();
        sink.clear();
        (stepper, sink, store)
    }

    fn move_steps_of(cmd: &ControllerCommand) -> i64 {
        match cmd {
            ControllerCommand::Move(MotionArgs { steps, .. }) => *steps,
            other => panic!("expected motion, got {:?}", other),
        }
    }

    #[test]
    fn test_construction_configures_pins() {
        let sink = Arc::new(ScriptedSink::new());
        let store = Arc::new(MemoryStore::new());
        store.set_stepper_position("carousel", 1600).unwrap();
        let stepper = Stepper::new(settings(8), sink.clone(), store).unwrap();

        assert_eq!(stepper.position_steps(), 1600);
        assert_eq!(stepper.position_degrees(), 360.0);
        assert_eq!(
            sink.commands(),
            vec![
                ControllerCommand::PinMode { pin: 36, mode: 1 },
                ControllerCommand::PinMode { pin: 34, mode: 1 },
                ControllerCommand::PinMode { pin: 30, mode: 1 },
                ControllerCommand::DigitalWrite { pin: 30, value: 0 },
            ]
        );
    }

    #[test]
    fn test_rotate_quarter_turn_at_16_microsteps() {
        let (mut stepper, sink, store) = stepper(16);
        assert_eq!(stepper.total_steps_per_rev(), 3200);

        stepper.rotate(90.0).unwrap();
        let cmds = sink.commands();
        assert_eq!(cmds.len(), 1);
        assert_eq!(move_steps_of(&cmds[0]), 800);
        assert_eq!(stepper.position_steps(), 800);
        assert_eq!(store.stepper_position("carousel"), 800);
    }

    #[test]
    fn test_degrees_truncate_toward_zero() {
        let (stepper, _, _) = stepper(8);
        assert_eq!(stepper.degrees_to_steps(0.3), 1);
        assert_eq!(stepper.degrees_to_steps(-0.3), -1);
        assert_eq!(stepper.degrees_to_steps(0.2), 0);
    }

    #[test]
    fn test_zero_step_blocking_move_sends_nothing() {
        let (mut stepper, sink, _) = stepper(8);
        let result = stepper
            .move_steps_blocking(0, Duration::from_secs(1))
            .unwrap();
        assert!(result.is_skipped());
        assert!(sink.sent().is_empty());
        assert_eq!(stepper.position_steps(), 0);
    }

    #[test]
    fn test_blocking_move_updates_position_after_completion() {
        let (mut stepper, sink, store) = stepper(8);
        let result = stepper
            .move_steps_blocking(-400, Duration::from_secs(3))
            .unwrap();
        assert!(matches!(result, MoveCompletion::Done { attempts: 1, .. }));
        assert_eq!(stepper.position_steps(), -400);
        assert_eq!(store.stepper_position("carousel"), -400);
        assert_eq!(
            sink.sent(),
            vec![Sent::Blocking(
                MotionProfile::new(1000).command(36, 34, -400),
                Duration::from_secs(3)
            )]
        );
    }

    #[test]
    fn test_blocking_move_retries_then_succeeds() {
        let (mut stepper, sink, _) = stepper(8);
        sink.push_result(Err(DriverError::Timeout {
            id: 1,
            timeout_ms: 100,
        }));
        sink.push_result(Err(DriverError::CommandFailed {
            id: 2,
            line: "ERR,T,2,stall".into(),
        }));
        let result = stepper
            .move_steps_blocking(10, Duration::from_millis(100))
            .unwrap();
        assert!(matches!(result, MoveCompletion::Done { attempts: 3, .. }));
        assert_eq!(sink.blocking_count(), 3);
        assert_eq!(stepper.position_steps(), 10);
    }

    #[test]
    fn test_blocking_move_raises_after_retry_bound() {
        let (mut stepper, sink, store) = stepper(8);
        for id in 1..=11 {
            sink.push_result(Err(DriverError::Timeout {
                id,
                timeout_ms: 100,
            }));
        }
        let err = stepper
            .move_steps_blocking(10, Duration::from_millis(100))
            .unwrap_err();
        match &err {
            ClientError::RetriesExhausted { attempts, source, .. } => {
                assert_eq!(*attempts, 11);
                assert!(matches!(source, DriverError::Timeout { id: 11, .. }));
            },
            other => panic!("unexpected error {other}"),
        }
        assert!(err.is_timeout());
        assert_eq!(sink.blocking_count(), 11);
        assert_eq!(stepper.position_steps(), 0);
        assert_eq!(store.stepper_position("carousel"), 0);
    }

    #[test]
    fn test_closed_bus_is_not_retried() {
        let (mut stepper, sink, _) = stepper(8);
        sink.push_result(Err(DriverError::NotRunning));
        let err = stepper
            .move_steps_blocking(10, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, ClientError::Driver(DriverError::NotRunning)));
        assert_eq!(sink.blocking_count(), 1);
    }

    #[test]
    fn test_enable_disable_halt() {
        let (stepper, sink, _) = stepper(8);
        stepper.disable().unwrap();
        stepper.enable().unwrap();
        stepper.halt().unwrap();
        let cmds = sink.commands();
        assert_eq!(cmds[0], ControllerCommand::DigitalWrite { pin: 30, value: 1 });
        assert_eq!(cmds[1], ControllerCommand::DigitalWrite { pin: 30, value: 0 });
        assert_eq!(move_steps_of(&cmds[2]), 0);
        assert_eq!(stepper.position_steps(), 0);
    }

    #[test]
    fn test_estimate_uses_default_profile() {
        let (stepper, _, _) = stepper(8);
        assert_eq!(
            stepper.estimate_move_degrees_ms(90.0),
            MotionProfile::new(1000).estimate_ms(400)
        );
    }
}
