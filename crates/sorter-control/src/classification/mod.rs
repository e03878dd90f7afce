//! 分类流水线
//!
//! ```text
//! Idle ──► Detecting ──► Rotating ──► Snapping ──► Idle
//!   └──────────────────────►┘   └──────────────────►┘
//! ```
//!
//! - `Detecting`: 上料平台出现零件并持续触发 `detection_hold_ms` 后登记零件
//! - `Rotating`: 转盘转动一个工位（出口有待分发零件时等待 `distribution_ready`）
//! - `Snapping`: 拍摄识别工位的零件并异步提交识别
//!
//! 识别结果通过通道回到控制线程，在每次 `step` 开始时写入零件。

mod detecting;
mod idle;
mod rotating;
mod snapping;

pub use detecting::Detecting;
pub use idle::Idle;
pub use rotating::{RotateOutcome, Rotating};
pub use snapping::Snapping;

use crate::carousel::CarouselRole;
use crate::clock::Clock;
use crate::context::SharedContext;
use crate::piece::{ClassificationResult, PieceId};
use crate::state::{MachineState, StateMachine, Stateful};
use crate::vision::{ClassificationCameras, Detector, FeederCamera, Identifier, ImageStore};
use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;
use sorter_client::Stepper;
use sorter_tools::{DetectionSection, TimingSection};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassificationStateId {
    Idle,
    Detecting,
    Rotating,
    Snapping,
}

impl fmt::Display for ClassificationStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassificationStateId::Idle => "idle",
            ClassificationStateId::Detecting => "detecting",
            ClassificationStateId::Rotating => "rotating",
            ClassificationStateId::Snapping => "snapping",
        };
        f.write_str(name)
    }
}

/// 分类流水线使用的外部协作者
pub struct ClassificationCollaborators {
    pub feeder_camera: Box<dyn FeederCamera>,
    pub cameras: Box<dyn ClassificationCameras>,
    pub detector: Box<dyn Detector>,
    pub identifier: Arc<dyn Identifier>,
    pub images: Box<dyn ImageStore>,
}

pub struct ClassificationDeps {
    pub clock: Arc<dyn Clock>,
    /// 转盘电机；转动在后台线程执行，所以需要共享
    pub carousel_stepper: Arc<Mutex<Stepper>>,
    pub feeder_camera: Box<dyn FeederCamera>,
    pub cameras: Box<dyn ClassificationCameras>,
    pub detector: Box<dyn Detector>,
    pub identifier: Arc<dyn Identifier>,
    pub images: Box<dyn ImageStore>,
    pub timing: TimingSection,
    pub detection: DetectionSection,
    inflight: Vec<PendingIdentification>,
}

/// 已提交、尚未返回的识别请求
struct PendingIdentification {
    id: PieceId,
    result_rx: Receiver<ClassificationResult>,
    submitted_ms: u64,
}

impl ClassificationDeps {
    pub fn new(
        clock: Arc<dyn Clock>,
        carousel_stepper: Arc<Mutex<Stepper>>,
        collaborators: ClassificationCollaborators,
        timing: TimingSection,
        detection: DetectionSection,
    ) -> Self {
        let ClassificationCollaborators {
            feeder_camera,
            cameras,
            detector,
            identifier,
            images,
        } = collaborators;
        Self {
            clock,
            carousel_stepper,
            feeder_camera,
            cameras,
            detector,
            identifier,
            images,
            timing,
            detection,
            inflight: Vec::new(),
        }
    }

    /// 尚未返回的识别请求数
    pub fn pending_identifications(&self) -> usize {
        self.inflight.len()
    }

    pub(crate) fn track_identification(
        &mut self,
        id: PieceId,
        result_rx: Receiver<ClassificationResult>,
    ) {
        let submitted_ms = self.clock.now_ms();
        self.inflight.push(PendingIdentification {
            id,
            result_rx,
            submitted_ms,
        });
    }

    /// 取回已完成的识别结果；超过 `identify_timeout_ms` 未返回的记为 unknown
    fn drain_identifications(&mut self, shared: &mut SharedContext) {
        let now = self.clock.now_ms();
        let timeout_ms = self.timing.identify_timeout_ms;
        self.inflight.retain(|pending| {
            let id = &pending.id;
            let result = match pending.result_rx.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => {
                    let waited = now.saturating_sub(pending.submitted_ms);
                    if waited < timeout_ms {
                        return true;
                    }
                    warn!(
                        "Identification of piece {} timed out after {} ms, marking unknown",
                        id.short(),
                        waited
                    );
                    ClassificationResult::Unknown
                },
                Err(TryRecvError::Disconnected) => {
                    warn!(
                        "Identifier dropped request for piece {}, marking unknown",
                        id.short()
                    );
                    ClassificationResult::Unknown
                },
            };
            if shared.resolve_classification(id, &result)
                && shared.carousel.role_of(id) == Some(CarouselRole::Intermediate)
            {
                // 分发流水线尚未为这个零件定位滑槽
                shared.distribution_ready = false;
            }
            false
        });
    }
}

pub enum ClassificationState {
    Idle(Idle),
    Detecting(Detecting),
    Rotating(Rotating),
    Snapping(Snapping),
}

impl Stateful for ClassificationState {
    type Id = ClassificationStateId;
    type Deps = ClassificationDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut ClassificationDeps,
    ) -> Option<ClassificationStateId> {
        deps.drain_identifications(shared);
        match self {
            ClassificationState::Idle(state) => state.step(shared, deps),
            ClassificationState::Detecting(state) => state.step(shared, deps),
            ClassificationState::Rotating(state) => state.step(shared, deps),
            ClassificationState::Snapping(state) => state.step(shared, deps),
        }
    }

    fn cleanup(&mut self, shared: &mut SharedContext, deps: &mut ClassificationDeps) {
        match self {
            ClassificationState::Idle(state) => state.cleanup(shared, deps),
            ClassificationState::Detecting(state) => state.cleanup(shared, deps),
            ClassificationState::Rotating(state) => state.cleanup(shared, deps),
            ClassificationState::Snapping(state) => state.cleanup(shared, deps),
        }
    }
}

impl MachineState for ClassificationState {
    const NAME: &'static str = "Classification";

    fn id(&self) -> ClassificationStateId {
        match self {
            ClassificationState::Idle(_) => ClassificationStateId::Idle,
            ClassificationState::Detecting(_) => ClassificationStateId::Detecting,
            ClassificationState::Rotating(_) => ClassificationStateId::Rotating,
            ClassificationState::Snapping(_) => ClassificationStateId::Snapping,
        }
    }

    fn enter(id: ClassificationStateId) -> Self {
        match id {
            ClassificationStateId::Idle => ClassificationState::Idle(Idle),
            ClassificationStateId::Detecting => ClassificationState::Detecting(Detecting::default()),
            ClassificationStateId::Rotating => ClassificationState::Rotating(Rotating::default()),
            ClassificationStateId::Snapping => ClassificationState::Snapping(Snapping::default()),
        }
    }
}

pub type ClassificationMachine = StateMachine<ClassificationState>;

impl ClassificationMachine {
    pub fn with_deps(deps: ClassificationDeps) -> Self {
        StateMachine::new(ClassificationStateId::Idle, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::piece::{ClassificationStatus, Piece, PieceStage};
    use crate::test_support::{FakeVision, RecordingSink, stepper};
    use crossbeam_channel::bounded;
    use sorter_protocol::ControllerCommand;
    use std::thread;
    use std::time::Duration;

    fn setup(clock: &MockClock, vision: &FakeVision) -> (ClassificationMachine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let timing = TimingSection {
            detection_settle_ms: 1000,
            detection_hold_ms: 1000,
            snapping_settle_ms: 2000,
            ..Default::default()
        };
        let deps = ClassificationDeps::new(
            Arc::new(clock.clone()),
            Arc::new(Mutex::new(stepper("carousel", 36, &sink))),
            vision.collaborators(),
            timing,
            DetectionSection::default(),
        );
        (ClassificationMachine::with_deps(deps), sink)
    }

    /// 反复推进直到离开 `state`（后台转动需要真实时间完成）
    fn step_while(
        machine: &mut ClassificationMachine,
        shared: &mut SharedContext,
        state: ClassificationStateId,
    ) {
        for _ in 0..2000 {
            machine.step(shared);
            if machine.current() != state {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("machine stuck in {}", state);
    }

    fn rotation_moves(sink: &RecordingSink) -> Vec<i64> {
        sink.commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                ControllerCommand::Move(args) => Some(args.steps),
                _ => None,
            })
            .collect()
    }

    /// 走到基线已就绪的 Detecting
    fn armed(machine: &mut ClassificationMachine, shared: &mut SharedContext, clock: &MockClock) {
        machine.step(shared);
        assert_eq!(machine.current(), ClassificationStateId::Detecting);
        machine.step(shared);
        clock.advance(1000);
        machine.step(shared);
    }

    #[test]
    fn test_trigger_must_be_held_for_full_duration() {
        let clock = MockClock::new();
        let vision = FakeVision::ready();
        let (mut machine, _sink) = setup(&clock, &vision);
        let (tx, rx) = bounded(16);
        let mut shared = SharedContext::new().with_events(tx);
        armed(&mut machine, &mut shared, &clock);

        vision.trigger();
        machine.step(&mut shared);
        clock.advance(900);
        machine.step(&mut shared);
        assert_eq!(machine.current(), ClassificationStateId::Detecting);
        assert!(shared.carousel.is_empty());
        assert!(shared.classification_ready);

        clock.advance(100);
        machine.step(&mut shared);
        assert_eq!(machine.current(), ClassificationStateId::Rotating);
        assert_eq!(shared.carousel.len(), 1);
        assert!(!shared.classification_ready);

        clock.advance(1000);
        machine.step(&mut shared);
        assert_eq!(shared.carousel.len(), 1);
        let created: Vec<_> = rx.try_iter().collect();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].data.stage, PieceStage::Created);
    }

    #[test]
    fn test_released_trigger_restarts_hold() {
        let clock = MockClock::new();
        let vision = FakeVision::ready();
        let (mut machine, _sink) = setup(&clock, &vision);
        let mut shared = SharedContext::new();
        armed(&mut machine, &mut shared, &clock);

        vision.trigger();
        machine.step(&mut shared);
        clock.advance(600);
        vision.release();
        machine.step(&mut shared);
        vision.trigger();
        clock.advance(600);
        machine.step(&mut shared);
        clock.advance(600);
        machine.step(&mut shared);
        assert_eq!(machine.current(), ClassificationStateId::Detecting);

        clock.advance(400);
        machine.step(&mut shared);
        assert_eq!(machine.current(), ClassificationStateId::Rotating);
    }

    #[test]
    fn test_missing_baseline_stalls() {
        let clock = MockClock::new();
        let vision = FakeVision::ready();
        vision.baseline_ok.store(false, std::sync::atomic::Ordering::SeqCst);
        let (mut machine, _sink) = setup(&clock, &vision);
        let mut shared = SharedContext::new();
        armed(&mut machine, &mut shared, &clock);

        vision.trigger();
        for _ in 0..5 {
            clock.advance(1000);
            machine.step(&mut shared);
        }
        assert_eq!(machine.current(), ClassificationStateId::Detecting);
        assert!(shared.carousel.is_empty());
    }

    #[test]
    fn test_detect_rotate_snap_identify() {
        let clock = MockClock::new();
        let vision = FakeVision::ready();
        let (mut machine, sink) = setup(&clock, &vision);
        let mut shared = SharedContext::new();
        armed(&mut machine, &mut shared, &clock);

        vision.trigger();
        machine.step(&mut shared);
        clock.advance(1000);
        machine.step(&mut shared);
        vision.release();

        step_while(&mut machine, &mut shared, ClassificationStateId::Rotating);
        assert_eq!(machine.current(), ClassificationStateId::Snapping);
        assert_eq!(rotation_moves(&sink), vec![400]);
        assert_eq!(sink.blocking_count(), 1);
        let id = shared
            .carousel
            .piece_at(CarouselRole::Classification)
            .unwrap()
            .id
            .clone();

        machine.step(&mut shared);
        clock.advance(2000);
        machine.step(&mut shared);
        assert_eq!(machine.current(), ClassificationStateId::Idle);
        assert!(shared.classification_ready);
        assert_eq!(machine.deps().pending_identifications(), 1);
        assert_eq!(
            shared.carousel.piece_at(CarouselRole::Classification).unwrap().classification_status,
            ClassificationStatus::Classifying
        );

        vision.complete_identifications(ClassificationResult::Classified {
            part_id: "3001".into(),
            confidence: Some(0.9),
        });
        machine.step(&mut shared);
        let piece = shared.find_piece_mut(&id).unwrap();
        assert_eq!(piece.part_id.as_deref(), Some("3001"));
        assert_eq!(machine.deps().pending_identifications(), 0);
    }

    #[test]
    fn test_dropped_identification_marks_unknown() {
        let clock = MockClock::new();
        let vision = FakeVision::ready();
        let (mut machine, _sink) = setup(&clock, &vision);
        let mut shared = SharedContext::new();

        let piece = Piece::new();
        let id = piece.id.clone();
        shared.carousel.add_piece_at_feeder(piece).unwrap();
        machine.step(&mut shared);
        assert_eq!(machine.current(), ClassificationStateId::Rotating);
        step_while(&mut machine, &mut shared, ClassificationStateId::Rotating);
        assert_eq!(machine.current(), ClassificationStateId::Snapping);

        machine.step(&mut shared);
        clock.advance(2000);
        machine.step(&mut shared);
        assert_eq!(machine.deps().pending_identifications(), 1);

        vision.drop_identifications();
        machine.step(&mut shared);
        assert_eq!(machine.deps().pending_identifications(), 0);
        let piece = shared.find_piece_mut(&id).unwrap();
        assert_eq!(piece.classification_status, ClassificationStatus::Unknown);
        assert!(piece.is_ready_for_distribution());
    }

    #[test]
    fn test_silent_identifier_times_out_to_unknown() {
        let clock = MockClock::new();
        let vision = FakeVision::ready();
        let (mut machine, _sink) = setup(&clock, &vision);
        let (tx, rx) = bounded(16);
        let mut shared = SharedContext::new().with_events(tx);

        let piece = Piece::new();
        let id = piece.id.clone();
        shared.carousel.add_piece_at_feeder(piece).unwrap();
        machine.step(&mut shared);
        step_while(&mut machine, &mut shared, ClassificationStateId::Rotating);
        machine.step(&mut shared);
        clock.advance(2000);
        machine.step(&mut shared);
        assert_eq!(machine.deps().pending_identifications(), 1);
        rx.try_iter().count();

        clock.advance(9_999);
        machine.step(&mut shared);
        assert_eq!(machine.deps().pending_identifications(), 1);
        assert_eq!(
            shared.find_piece_mut(&id).unwrap().classification_status,
            ClassificationStatus::Classifying
        );

        clock.advance(1);
        machine.step(&mut shared);
        assert_eq!(machine.deps().pending_identifications(), 0);
        let piece = shared.find_piece_mut(&id).unwrap();
        assert_eq!(piece.classification_status, ClassificationStatus::Unknown);
        assert!(piece.is_ready_for_distribution());
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events.last().unwrap().data.classification_status,
            ClassificationStatus::Unknown
        );

        // 超时之后才到的回调被忽略
        assert_eq!(
            vision.complete_identifications(ClassificationResult::Classified {
                part_id: "3001".into(),
                confidence: None,
            }),
            1
        );
        machine.step(&mut shared);
        assert!(shared.find_piece_mut(&id).unwrap().part_id.is_none());
    }

    #[test]
    fn test_rotation_waits_for_distribution() {
        let clock = MockClock::new();
        let vision = FakeVision::ready();
        let (mut machine, sink) = setup(&clock, &vision);
        let mut shared = SharedContext::new();

        let waiting = Piece::new();
        let waiting_id = waiting.id.clone();
        shared.carousel.add_piece_at_feeder(waiting).unwrap();
        shared.carousel.rotate();
        shared.carousel.rotate();
        shared
            .carousel
            .resolve_classification(&waiting_id, &ClassificationResult::NotFound)
            .unwrap();
        shared.distribution_ready = false;
        shared.carousel.add_piece_at_feeder(Piece::new()).unwrap();

        machine.step(&mut shared);
        assert_eq!(machine.current(), ClassificationStateId::Rotating);
        for _ in 0..5 {
            clock.advance(1000);
            machine.step(&mut shared);
        }
        assert_eq!(sink.blocking_count(), 0);

        // 标志已放行但零件还没被认领：继续等待
        shared.distribution_ready = true;
        clock.advance(1000);
        machine.step(&mut shared);
        assert_eq!(sink.blocking_count(), 0);

        let claimed = shared.carousel.piece_at_mut(CarouselRole::Intermediate).unwrap();
        claimed.stage = PieceStage::Distributing;
        claimed.set_destination(sorter_client::BinAddress::new(0, 0, 0));
        step_while(&mut machine, &mut shared, ClassificationStateId::Rotating);
        assert_eq!(shared.handoff.as_ref(), Some(&waiting_id));
        assert!(!shared.distribution_ready);
        assert_eq!(machine.current(), ClassificationStateId::Snapping);
    }
}
