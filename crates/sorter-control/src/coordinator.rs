//! 协调器
//!
//! 每次 `step` 依次推进上料、分类、分发三条状态机各一次，共享同一个 [`SharedContext`]。
//! 控制循环是单线程的；后台转动和识别结果都在后续 tick 中被观察到。

use crate::classification::{ClassificationCollaborators, ClassificationDeps, ClassificationMachine};
use crate::clock::{Clock, SystemClock};
use crate::context::SharedContext;
use crate::distribution::{DistributionDeps, DistributionMachine, DoorBank};
use crate::feeder::{FeederDeps, FeederMachine, PulseSettings};
use crate::metrics::{StepTimings, timed};
use crate::piece::PieceEvent;
use crate::task::CancellationToken;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use sorter_client::{
    Chute, ChuteGeometry, ClientError, DistributionLayout, DoorAngles, Servo, Stepper,
    StepperSettings,
};
use sorter_driver::CommandSink;
use sorter_tools::{ConfigError, MachineStore, SorterConfig, SortingProfile};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Axis error: {0}")]
    Client(#[from] ClientError),
}

/// 外部协作者
pub struct Collaborators {
    pub classification: ClassificationCollaborators,
    pub profile: Arc<dyn SortingProfile>,
}

/// 运行状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub ticks: u64,
    pub feeder: String,
    pub classification: String,
    pub distribution: String,
    pub classification_ready: bool,
    pub distribution_ready: bool,
    pub chute_move_in_progress: bool,
    pub pieces_on_carousel: usize,
    pub pending_identifications: usize,
    pub exited_pieces: usize,
    /// 滑槽运动进行中时为空
    pub chute_angle: Option<f64>,
    pub step_timings: StepTimings,
}

pub struct Coordinator {
    shared: SharedContext,
    feeder: FeederMachine,
    classification: ClassificationMachine,
    distribution: DistributionMachine,
    ticks: u64,
    timings: StepTimings,
}

impl Coordinator {
    pub fn new(
        shared: SharedContext,
        feeder: FeederMachine,
        classification: ClassificationMachine,
        distribution: DistributionMachine,
    ) -> Self {
        Self {
            shared,
            feeder,
            classification,
            distribution,
            ticks: 0,
            timings: StepTimings::default(),
        }
    }

    /// 推进一次：上料 → 分类 → 分发
    pub fn step(&mut self) {
        let started = Instant::now();
        let shared = &mut self.shared;
        timed(&mut self.timings.feeder, || self.feeder.step(shared));
        timed(&mut self.timings.classification, || {
            self.classification.step(shared)
        });
        timed(&mut self.timings.distribution, || {
            self.distribution.step(shared)
        });
        self.timings.total.record(started.elapsed());
        self.ticks += 1;
    }

    /// 以固定周期运行直到 `stop` 被取消
    pub fn run(&mut self, tick: Duration, stop: &CancellationToken) {
        info!("Control loop started (tick={}ms)", tick.as_millis());
        while !stop.is_cancelled() {
            let started = Instant::now();
            self.step();
            let elapsed = started.elapsed();
            if elapsed < tick {
                spin_sleep::sleep(tick - elapsed);
            }
        }
        self.cleanup();
        info!("Control loop stopped after {} ticks", self.ticks);
    }

    /// 调用三条状态机当前状态的清理
    pub fn cleanup(&mut self) {
        self.feeder.cleanup(&mut self.shared);
        self.classification.cleanup(&mut self.shared);
        self.distribution.cleanup(&mut self.shared);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// 各状态机 `step` 的耗时统计
    pub fn timings(&self) -> &StepTimings {
        &self.timings
    }

    pub fn shared(&self) -> &SharedContext {
        &self.shared
    }

    pub fn shared_mut(&mut self) -> &mut SharedContext {
        &mut self.shared
    }

    pub fn feeder(&self) -> &FeederMachine {
        &self.feeder
    }

    pub fn feeder_mut(&mut self) -> &mut FeederMachine {
        &mut self.feeder
    }

    pub fn classification(&self) -> &ClassificationMachine {
        &self.classification
    }

    pub fn distribution(&self) -> &DistributionMachine {
        &self.distribution
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            ticks: self.ticks,
            feeder: self.feeder.current().to_string(),
            classification: self.classification.current().to_string(),
            distribution: self.distribution.current().to_string(),
            classification_ready: self.shared.classification_ready,
            distribution_ready: self.shared.distribution_ready,
            chute_move_in_progress: self.shared.chute_move_in_progress,
            pieces_on_carousel: self.shared.carousel.len(),
            pending_identifications: self.classification.deps().pending_identifications(),
            exited_pieces: self.shared.exited().count(),
            chute_angle: self
                .distribution
                .deps()
                .chute
                .try_lock()
                .map(|chute| chute.current_angle()),
            step_timings: self.timings,
        }
    }
}

/// 从配置构建协调器
pub struct CoordinatorBuilder {
    config: SorterConfig,
    sink: Arc<dyn CommandSink>,
    store: Arc<dyn MachineStore>,
    clock: Arc<dyn Clock>,
    events: Option<Sender<PieceEvent>>,
}

impl CoordinatorBuilder {
    pub fn new(
        config: SorterConfig,
        sink: Arc<dyn CommandSink>,
        store: Arc<dyn MachineStore>,
    ) -> Self {
        Self {
            config,
            sink,
            store,
            clock: Arc::new(SystemClock::new()),
            events: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 零件生命周期事件出口
    pub fn events(mut self, events: Sender<PieceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// 初始化所有轴并组装三条状态机
    ///
    /// # 错误
    /// - `ControlError::Config`: 配置校验失败
    /// - `ControlError::Client`: 轴初始化失败（总线不可用等）
    pub fn build(self, collaborators: Collaborators) -> Result<Coordinator, ControlError> {
        let Self {
            config,
            sink,
            store,
            clock,
            events,
        } = self;
        config.validate()?;

        let carousel_stepper = Stepper::new(
            StepperSettings::from_section("carousel", &config.carousel),
            sink.clone(),
            store.clone(),
        )?;
        let chute_stepper = Stepper::new(
            StepperSettings::from_section("chute", &config.chute),
            sink.clone(),
            store.clone(),
        )?;
        let feeder_stepper = Stepper::new(
            StepperSettings::from_section("feeder", &config.feeder.stepper),
            sink.clone(),
            store.clone(),
        )?;

        let angles = DoorAngles::from(&config.doors);
        let servos = config
            .layers
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                Servo::new(
                    format!("layer_{}", index),
                    layer.servo_pin,
                    angles,
                    sink.clone(),
                    store.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut layout = DistributionLayout::from_config(&config.layers)?;
        if let Some(saved) = store.bin_categories() {
            if layout.apply_categories(&saved) {
                info!("Restored bin categories from store");
            } else {
                warn!("Stored bin categories do not match the configured layout, ignoring");
            }
        }

        let chute = Chute::new(
            chute_stepper,
            ChuteGeometry::from(&config.chute_geometry),
            config.simulate_chute,
        );

        let mut shared = SharedContext::new();
        if let Some(events) = events {
            shared = shared.with_events(events);
        }

        let feeder = FeederMachine::with_deps(FeederDeps::new(
            clock.clone(),
            feeder_stepper,
            PulseSettings::from(&config.feeder),
            config.timing.waiting_log_interval_ms,
        ));
        let classification = ClassificationMachine::with_deps(ClassificationDeps::new(
            clock.clone(),
            Arc::new(Mutex::new(carousel_stepper)),
            collaborators.classification,
            config.timing.clone(),
            config.detection.clone(),
        ));
        let distribution = DistributionMachine::with_deps(DistributionDeps {
            clock,
            chute: Arc::new(Mutex::new(chute)),
            doors: DoorBank::new(servos),
            layout,
            profile: collaborators.profile,
            store,
            timing: config.timing.clone(),
        });

        info!(
            "Coordinator ready ({} layers, {} bins, simulate_chute={})",
            config.layers.len(),
            distribution.deps().layout.bin_count(),
            config.simulate_chute
        );
        Ok(Coordinator::new(shared, feeder, classification, distribution))
    }
}
