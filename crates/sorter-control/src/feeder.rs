//! 上料流水线
//!
//! 开环脉冲：分类工位就绪且滑槽不在运动时，上料电机按固定步数转动一次，
//! 之后至少间隔 `pulse_gap_ms`（或估算运动时长，取较大者）才发下一次。

use crate::clock::Clock;
use crate::context::SharedContext;
use crate::state::{MachineState, StateMachine, Stateful, WaitLog};
use sorter_client::Stepper;
use sorter_tools::FeederSection;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeederStateId {
    Idle,
    Feeding,
}

impl fmt::Display for FeederStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeederStateId::Idle => f.write_str("idle"),
            FeederStateId::Feeding => f.write_str("feeding"),
        }
    }
}

/// 脉冲参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSettings {
    pub steps_per_pulse: i64,
    /// 反向转动（步数取负）
    pub reverse: bool,
    pub gap_ms: u64,
}

impl PulseSettings {
    pub fn signed_steps(&self) -> i64 {
        if self.reverse {
            -self.steps_per_pulse
        } else {
            self.steps_per_pulse
        }
    }
}

impl From<&FeederSection> for PulseSettings {
    fn from(section: &FeederSection) -> Self {
        Self {
            steps_per_pulse: i64::from(section.steps_per_pulse),
            reverse: section.reverse,
            gap_ms: section.pulse_gap_ms,
        }
    }
}

pub struct FeederDeps {
    pub clock: Arc<dyn Clock>,
    pub stepper: Stepper,
    pub pulse: PulseSettings,
    pub waiting_log_interval_ms: u64,
    pub paused: bool,
    pulses: u64,
}

impl FeederDeps {
    pub fn new(
        clock: Arc<dyn Clock>,
        stepper: Stepper,
        pulse: PulseSettings,
        waiting_log_interval_ms: u64,
    ) -> Self {
        Self {
            clock,
            stepper,
            pulse,
            waiting_log_interval_ms,
            paused: false,
            pulses: 0,
        }
    }

    /// 已发出的脉冲数
    pub fn pulses(&self) -> u64 {
        self.pulses
    }
}

#[derive(Debug, Default)]
pub struct FeederIdle;

impl Stateful for FeederIdle {
    type Id = FeederStateId;
    type Deps = FeederDeps;

    fn step(&mut self, _shared: &mut SharedContext, deps: &mut FeederDeps) -> Option<FeederStateId> {
        (!deps.paused).then_some(FeederStateId::Feeding)
    }
}

#[derive(Debug, Default)]
pub struct Feeding {
    busy_until_ms: u64,
    chute_wait: WaitLog,
}

impl Stateful for Feeding {
    type Id = FeederStateId;
    type Deps = FeederDeps;

    fn step(&mut self, shared: &mut SharedContext, deps: &mut FeederDeps) -> Option<FeederStateId> {
        if deps.paused {
            return Some(FeederStateId::Idle);
        }
        let now = deps.clock.now_ms();

        if shared.chute_move_in_progress {
            if let Some(waited) = self.chute_wait.waiting(now, deps.waiting_log_interval_ms) {
                info!("Feeder: skipping, chute move in progress ({} ms)", waited);
            }
            return None;
        }
        self.chute_wait.finish(now);

        if !shared.classification_ready || now < self.busy_until_ms {
            return None;
        }

        let steps = deps.pulse.signed_steps();
        if let Err(e) = deps.stepper.move_steps(steps) {
            error!("Feeder: pulse failed: {}", e);
            self.busy_until_ms = now + deps.pulse.gap_ms;
            return None;
        }
        let estimated_ms = deps.stepper.estimate_move_ms(steps);
        self.busy_until_ms = now + estimated_ms.max(deps.pulse.gap_ms);
        deps.pulses += 1;
        debug!(
            "Feeder: pulse {} sent ({} steps, busy {} ms)",
            deps.pulses,
            steps,
            self.busy_until_ms - now
        );
        None
    }
}

pub enum FeederState {
    Idle(FeederIdle),
    Feeding(Feeding),
}

impl Stateful for FeederState {
    type Id = FeederStateId;
    type Deps = FeederDeps;

    fn step(&mut self, shared: &mut SharedContext, deps: &mut FeederDeps) -> Option<FeederStateId> {
        match self {
            FeederState::Idle(state) => state.step(shared, deps),
            FeederState::Feeding(state) => state.step(shared, deps),
        }
    }
}

impl MachineState for FeederState {
    const NAME: &'static str = "Feeder";

    fn id(&self) -> FeederStateId {
        match self {
            FeederState::Idle(_) => FeederStateId::Idle,
            FeederState::Feeding(_) => FeederStateId::Feeding,
        }
    }

    fn enter(id: FeederStateId) -> Self {
        match id {
            FeederStateId::Idle => FeederState::Idle(FeederIdle),
            FeederStateId::Feeding => FeederState::Feeding(Feeding::default()),
        }
    }
}

pub type FeederMachine = StateMachine<FeederState>;

impl FeederMachine {
    pub fn with_deps(deps: FeederDeps) -> Self {
        StateMachine::new(FeederStateId::Idle, deps)
    }

    pub fn pause(&mut self) {
        info!("Feeder paused");
        self.deps_mut().paused = true;
    }

    pub fn resume(&mut self) {
        info!("Feeder resumed");
        self.deps_mut().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.deps().paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::test_support::{RecordingSink, stepper};
    use sorter_protocol::ControllerCommand;

    fn machine(clock: &MockClock, sink: &Arc<RecordingSink>) -> FeederMachine {
        let pulse = PulseSettings {
            steps_per_pulse: 200,
            reverse: true,
            gap_ms: 1500,
        };
        FeederMachine::with_deps(FeederDeps::new(
            Arc::new(clock.clone()),
            stepper("feeder", 54, sink),
            pulse,
            1000,
        ))
    }

    fn pulses(sink: &RecordingSink) -> Vec<i64> {
        sink.commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                ControllerCommand::Move(args) => Some(args.steps),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_pulses_respect_gap() {
        let clock = MockClock::new();
        let sink = Arc::new(RecordingSink::new());
        let mut feeder = machine(&clock, &sink);
        let mut shared = SharedContext::new();

        feeder.step(&mut shared);
        assert_eq!(feeder.current(), FeederStateId::Feeding);
        feeder.step(&mut shared);
        assert_eq!(pulses(&sink), vec![-200]);

        clock.advance(1000);
        feeder.step(&mut shared);
        assert_eq!(pulses(&sink).len(), 1);

        clock.advance(500);
        feeder.step(&mut shared);
        assert_eq!(pulses(&sink), vec![-200, -200]);
        assert_eq!(feeder.deps().pulses(), 2);
    }

    #[test]
    fn test_no_pulse_while_chute_moves_or_classification_busy() {
        let clock = MockClock::new();
        let sink = Arc::new(RecordingSink::new());
        let mut feeder = machine(&clock, &sink);
        let mut shared = SharedContext::new();
        feeder.step(&mut shared);

        shared.chute_move_in_progress = true;
        feeder.step(&mut shared);
        shared.chute_move_in_progress = false;
        shared.classification_ready = false;
        feeder.step(&mut shared);
        assert!(pulses(&sink).is_empty());

        shared.classification_ready = true;
        feeder.step(&mut shared);
        assert_eq!(pulses(&sink).len(), 1);
    }

    #[test]
    fn test_pause_returns_to_idle() {
        let clock = MockClock::new();
        let sink = Arc::new(RecordingSink::new());
        let mut feeder = machine(&clock, &sink);
        let mut shared = SharedContext::new();
        feeder.step(&mut shared);

        feeder.pause();
        feeder.step(&mut shared);
        assert_eq!(feeder.current(), FeederStateId::Idle);
        clock.advance(10_000);
        feeder.step(&mut shared);
        assert!(pulses(&sink).is_empty());

        feeder.resume();
        feeder.step(&mut shared);
        feeder.step(&mut shared);
        assert_eq!(pulses(&sink).len(), 1);
    }
}
