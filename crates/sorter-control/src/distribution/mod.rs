//! 分发流水线
//!
//! ```text
//! Idle ──► Positioning ──► Ready ──► Sending ──► Idle
//! ```
//!
//! `Idle` 为中间工位的零件分配料仓；`Positioning` 选门并转动滑槽；
//! `Ready` 通知分类流水线可以转动转盘；`Sending` 等待零件落仓后记为已分发。

mod doors;
mod idle;
mod positioning;
mod ready;
mod sending;

pub use doors::DoorBank;
pub use idle::Idle;
pub use positioning::Positioning;
pub use ready::Ready;
pub use sending::Sending;

use crate::clock::Clock;
use crate::context::SharedContext;
use crate::state::{MachineState, StateMachine, Stateful};
use parking_lot::Mutex;
use sorter_client::{Chute, DistributionLayout};
use sorter_tools::{MachineStore, SortingProfile, TimingSection};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionStateId {
    Idle,
    Positioning,
    Ready,
    Sending,
}

impl fmt::Display for DistributionStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistributionStateId::Idle => "idle",
            DistributionStateId::Positioning => "positioning",
            DistributionStateId::Ready => "ready",
            DistributionStateId::Sending => "sending",
        };
        f.write_str(name)
    }
}

pub struct DistributionDeps {
    pub clock: Arc<dyn Clock>,
    /// 滑槽；定位运动在后台线程执行，所以需要共享
    pub chute: Arc<Mutex<Chute>>,
    pub doors: DoorBank,
    pub layout: DistributionLayout,
    pub profile: Arc<dyn SortingProfile>,
    pub store: Arc<dyn MachineStore>,
    pub timing: TimingSection,
}

pub enum DistributionState {
    Idle(Idle),
    Positioning(Positioning),
    Ready(Ready),
    Sending(Sending),
}

impl Stateful for DistributionState {
    type Id = DistributionStateId;
    type Deps = DistributionDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut DistributionDeps,
    ) -> Option<DistributionStateId> {
        match self {
            DistributionState::Idle(state) => state.step(shared, deps),
            DistributionState::Positioning(state) => state.step(shared, deps),
            DistributionState::Ready(state) => state.step(shared, deps),
            DistributionState::Sending(state) => state.step(shared, deps),
        }
    }

    fn cleanup(&mut self, shared: &mut SharedContext, deps: &mut DistributionDeps) {
        match self {
            DistributionState::Idle(state) => state.cleanup(shared, deps),
            DistributionState::Positioning(state) => state.cleanup(shared, deps),
            DistributionState::Ready(state) => state.cleanup(shared, deps),
            DistributionState::Sending(state) => state.cleanup(shared, deps),
        }
    }
}

impl MachineState for DistributionState {
    const NAME: &'static str = "Distribution";

    fn id(&self) -> DistributionStateId {
        match self {
            DistributionState::Idle(_) => DistributionStateId::Idle,
            DistributionState::Positioning(_) => DistributionStateId::Positioning,
            DistributionState::Ready(_) => DistributionStateId::Ready,
            DistributionState::Sending(_) => DistributionStateId::Sending,
        }
    }

    fn enter(id: DistributionStateId) -> Self {
        match id {
            DistributionStateId::Idle => DistributionState::Idle(Idle::default()),
            DistributionStateId::Positioning => {
                DistributionState::Positioning(Positioning::default())
            },
            DistributionStateId::Ready => DistributionState::Ready(Ready::default()),
            DistributionStateId::Sending => DistributionState::Sending(Sending::default()),
        }
    }
}

pub type DistributionMachine = StateMachine<DistributionState>;

impl DistributionMachine {
    pub fn with_deps(deps: DistributionDeps) -> Self {
        StateMachine::new(DistributionStateId::Idle, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carousel::CarouselRole;
    use crate::clock::MockClock;
    use crate::piece::{ClassificationResult, Piece, PieceStage};
    use crate::test_support::{RecordingSink, stepper};
    use sorter_client::{BinAddress, ChuteGeometry, DoorAngles, Servo};
    use sorter_driver::CommandSink;
    use sorter_tools::{MemoryStore, StaticSortingProfile};
    use std::thread;
    use std::time::Duration;

    struct Rig {
        machine: DistributionMachine,
        sink: Arc<RecordingSink>,
        store: Arc<MemoryStore>,
    }

    fn rig(clock: &MockClock, layers: &[Vec<usize>]) -> Rig {
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryStore::new());
        let dyn_sink: Arc<dyn CommandSink> = sink.clone();
        let servos = (0..layers.len())
            .map(|index| {
                Servo::new(
                    format!("layer_{}", index),
                    2 + index as u8,
                    DoorAngles::default(),
                    dyn_sink.clone(),
                    store.clone(),
                )
                .unwrap()
            })
            .collect();
        let deps = DistributionDeps {
            clock: Arc::new(clock.clone()),
            chute: Arc::new(Mutex::new(Chute::new(
                stepper("chute", 26, &sink),
                ChuteGeometry::default(),
                false,
            ))),
            doors: DoorBank::new(servos),
            layout: DistributionLayout::from_bins_per_section(layers).unwrap(),
            profile: Arc::new(StaticSortingProfile::new().with("3001", "bricks")),
            store: store.clone(),
            timing: TimingSection::default(),
        };
        Rig {
            machine: DistributionMachine::with_deps(deps),
            sink,
            store,
        }
    }

    /// 中间工位放一个已识别的零件
    fn shared_with_piece(result: ClassificationResult) -> (SharedContext, crate::PieceId) {
        let mut shared = SharedContext::new();
        let piece = Piece::new();
        let id = piece.id.clone();
        shared.carousel.add_piece_at_feeder(piece).unwrap();
        shared.carousel.rotate();
        shared.carousel.rotate();
        shared.carousel.resolve_classification(&id, &result).unwrap();
        (shared, id)
    }

    /// 轮询直到后台滑槽运动结束
    fn finish_chute_move(rig: &mut Rig, shared: &mut SharedContext) {
        for _ in 0..2000 {
            rig.machine.step(shared);
            if !shared.chute_move_in_progress {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("chute move did not finish");
    }

    fn classified(part_id: &str) -> ClassificationResult {
        ClassificationResult::Classified {
            part_id: part_id.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn test_full_cycle() {
        let clock = MockClock::new();
        let mut rig = rig(&clock, &[vec![1; 6], vec![1; 6]]);
        let (mut shared, id) = shared_with_piece(classified("3001"));

        rig.machine.step(&mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Positioning);
        assert!(!shared.distribution_ready);
        let piece = shared.carousel.piece_at(CarouselRole::Intermediate).unwrap();
        assert_eq!(piece.stage, PieceStage::Distributing);
        assert_eq!(piece.category_id.as_deref(), Some("bricks"));
        assert_eq!(piece.destination(), Some(BinAddress::new(0, 0, 0)));
        assert!(rig.store.snapshot().bin_categories.is_some());

        rig.machine.step(&mut shared);
        assert!(rig.machine.deps().doors.get(0).unwrap().is_closed());
        assert!(rig.machine.deps().doors.get(1).unwrap().is_open());

        clock.advance(1500);
        rig.machine.step(&mut shared);
        clock.advance(4999);
        rig.machine.step(&mut shared);
        assert_eq!(rig.sink.blocking_count(), 0);
        clock.advance(1);
        rig.machine.step(&mut shared);
        assert!(shared.chute_move_in_progress);
        finish_chute_move(&mut rig, &mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Ready);
        assert_eq!(rig.sink.blocking_count(), 1);
        assert!(!shared.chute_move_in_progress);
        assert!(rig.machine.deps().chute.lock().current_angle() > 0.0);

        rig.machine.step(&mut shared);
        assert!(shared.distribution_ready);
        assert_eq!(rig.machine.current(), DistributionStateId::Ready);

        // 转盘转动：零件到达出口
        shared.carousel.rotate();
        shared.handoff = Some(id.clone());
        shared.distribution_ready = false;
        rig.machine.step(&mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Sending);

        rig.machine.step(&mut shared);
        assert!(shared.handoff.is_none());
        clock.advance(499);
        rig.machine.step(&mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Sending);
        clock.advance(1);
        rig.machine.step(&mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Idle);
        assert!(shared.distribution_ready);
        let piece = shared.find_piece_mut(&id).unwrap();
        assert_eq!(piece.stage, PieceStage::Distributed);
    }

    #[test]
    fn test_no_bins_stays_idle() {
        let clock = MockClock::new();
        let mut rig = rig(&clock, &[vec![1]]);
        let taken = vec![vec![vec![Some("plates".to_string())]]];
        assert!(rig.machine.deps_mut().layout.apply_categories(&taken));
        let (mut shared, _id) = shared_with_piece(classified("3001"));

        for _ in 0..10 {
            clock.advance(1000);
            rig.machine.step(&mut shared);
        }
        assert_eq!(rig.machine.current(), DistributionStateId::Idle);
        let piece = shared.carousel.piece_at(CarouselRole::Intermediate).unwrap();
        assert_eq!(piece.stage, PieceStage::Created);
        assert!(piece.destination().is_none());
        assert!(!shared.distribution_ready);
        assert_eq!(rig.sink.blocking_count(), 0);
    }

    #[test]
    fn test_unidentified_piece_goes_to_misc() {
        let clock = MockClock::new();
        let mut rig = rig(&clock, &[vec![2]]);
        let (mut shared, _id) = shared_with_piece(ClassificationResult::NotFound);

        rig.machine.step(&mut shared);
        let piece = shared.carousel.piece_at(CarouselRole::Intermediate).unwrap();
        assert_eq!(piece.category_id.as_deref(), Some(sorter_tools::MISC_CATEGORY));
        assert_eq!(rig.machine.current(), DistributionStateId::Positioning);
    }

    #[test]
    fn test_pending_piece_is_ignored() {
        let clock = MockClock::new();
        let mut rig = rig(&clock, &[vec![1]]);
        let mut shared = SharedContext::new();
        shared.carousel.add_piece_at_feeder(Piece::new()).unwrap();
        shared.carousel.rotate();
        shared.carousel.rotate();

        rig.machine.step(&mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Idle);
        assert!(shared.distribution_ready);
    }

    #[test]
    fn test_chute_failure_retries_after_settle() {
        let clock = MockClock::new();
        let mut rig = rig(&clock, &[vec![1]]);
        let (mut shared, _id) = shared_with_piece(classified("3001"));

        rig.machine.step(&mut shared);
        rig.machine.step(&mut shared);
        clock.advance(1500);
        rig.machine.step(&mut shared);
        clock.advance(5000);
        rig.sink.fail_next_blocking(2);
        rig.machine.step(&mut shared);
        finish_chute_move(&mut rig, &mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Positioning);
        assert_eq!(rig.sink.blocking_count(), 2);
        assert!(!shared.chute_move_in_progress);
        assert_eq!(rig.machine.deps().chute.lock().current_angle(), 0.0);

        clock.advance(4999);
        rig.machine.step(&mut shared);
        assert_eq!(rig.sink.blocking_count(), 2);
        clock.advance(1);
        rig.machine.step(&mut shared);
        finish_chute_move(&mut rig, &mut shared);
        assert_eq!(rig.machine.current(), DistributionStateId::Ready);
        assert_eq!(rig.sink.blocking_count(), 3);
    }

    #[test]
    fn test_door_select_reopens_other_layers() {
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryStore::new());
        let dyn_sink: Arc<dyn CommandSink> = sink.clone();
        let servos = (0..3)
            .map(|index| {
                Servo::new(
                    format!("layer_{}", index),
                    2 + index as u8,
                    DoorAngles::default(),
                    dyn_sink.clone(),
                    store.clone(),
                )
                .unwrap()
            })
            .collect();
        let mut doors = DoorBank::new(servos);

        doors.select(0).unwrap();
        assert!(doors.get(0).unwrap().is_closed());
        doors.select(2).unwrap();
        assert!(doors.get(0).unwrap().is_open());
        assert!(doors.get(1).unwrap().is_open());
        assert!(doors.get(2).unwrap().is_closed());

        doors.select(2).unwrap();
        assert!(doors.get(2).unwrap().is_closed());
        assert!(doors.get(0).unwrap().is_open());

        assert!(matches!(
            doors.select(3),
            Err(sorter_client::ClientError::InvalidLayout(_))
        ));
    }
}
