use super::{DistributionDeps, DistributionStateId};
use crate::carousel::CarouselRole;
use crate::context::SharedContext;
use crate::state::Stateful;
use crate::task::{BackgroundTask, TaskPoll};
use sorter_client::{BinAddress, ClientError};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    DoorSettle { until_ms: u64 },
    PreMove { until_ms: u64 },
    Moving,
}

/// 后台滑槽运动的结果
#[derive(Debug)]
enum ChuteOutcome {
    Done(u64),
    Cancelled,
    Failed(ClientError),
}

/// 选门并把滑槽转到目标料仓
///
/// 滑槽运动在后台线程上阻塞等待 MCU 确认，期间 `chute_move_in_progress` 为真，
/// 上料暂停。运动失败时保持在本状态，等待 `pre_move_settle_ms` 后从最后确认的位置重新定位。
pub struct Positioning {
    phase: Phase,
    address: Option<BinAddress>,
    task: Option<BackgroundTask<ChuteOutcome>>,
}

impl Default for Positioning {
    fn default() -> Self {
        Self {
            phase: Phase::Start,
            address: None,
            task: None,
        }
    }
}

impl Positioning {
    fn retry_later(&mut self, now: u64, deps: &DistributionDeps) {
        self.phase = Phase::PreMove {
            until_ms: now + deps.timing.pre_move_settle_ms,
        };
    }

    fn start_move(&mut self, shared: &mut SharedContext, deps: &DistributionDeps, now: u64) {
        let Some(address) = self.address else {
            return;
        };
        let target = match deps.chute.lock().angle_for_bin(&deps.layout, address) {
            Ok(target) => target,
            Err(e) => {
                error!("Positioning: no chute angle for {}: {}", address, e);
                self.retry_later(now, deps);
                return;
            },
        };

        let chute = deps.chute.clone();
        let buffer = Duration::from_millis(deps.timing.chute_move_buffer_ms);
        let spawned = BackgroundTask::spawn("chute-position", move |token| {
            if token.is_cancelled() {
                return ChuteOutcome::Cancelled;
            }
            match chute.lock().move_to_angle_blocking(target, buffer) {
                Ok(moved_ms) => ChuteOutcome::Done(moved_ms),
                Err(e) => ChuteOutcome::Failed(e),
            }
        });
        match spawned {
            Ok(task) => {
                shared.chute_move_in_progress = true;
                self.task = Some(task);
                self.phase = Phase::Moving;
            },
            Err(e) => {
                error!("Positioning: failed to spawn chute worker: {}", e);
                self.retry_later(now, deps);
            },
        }
    }
}

impl Stateful for Positioning {
    type Id = DistributionStateId;
    type Deps = DistributionDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut DistributionDeps,
    ) -> Option<DistributionStateId> {
        let now = deps.clock.now_ms();
        let timing = &deps.timing;

        match self.phase {
            Phase::Start => {
                let Some(address) = shared
                    .carousel
                    .piece_at(CarouselRole::Intermediate)
                    .and_then(|piece| piece.destination())
                else {
                    warn!("Positioning: no assigned piece at intermediate");
                    return Some(DistributionStateId::Idle);
                };
                info!(
                    "Positioning: moving to bin at layer={}, section={}, bin={}",
                    address.layer_index, address.section_index, address.bin_index
                );
                if let Err(e) = deps.doors.select(address.layer_index) {
                    error!("Positioning: door selection failed: {}", e);
                    return None;
                }
                self.address = Some(address);
                self.phase = Phase::DoorSettle {
                    until_ms: now + timing.door_settle_ms,
                };
                None
            },
            Phase::DoorSettle { until_ms } => {
                if now < until_ms {
                    return None;
                }
                info!(
                    "Positioning: extra wait before chute move {}ms",
                    timing.pre_move_settle_ms
                );
                self.phase = Phase::PreMove {
                    until_ms: now + timing.pre_move_settle_ms,
                };
                None
            },
            Phase::PreMove { until_ms } => {
                if now >= until_ms {
                    self.start_move(shared, deps, now);
                }
                None
            },
            Phase::Moving => {
                let outcome = match self.task.as_mut()?.poll() {
                    TaskPoll::Pending => return None,
                    TaskPoll::Done(outcome) => Some(outcome),
                    TaskPoll::Lost => None,
                };
                self.task = None;
                shared.chute_move_in_progress = false;

                match outcome {
                    Some(ChuteOutcome::Done(chute_move_ms)) => {
                        info!(
                            "Positioning: chute move confirmed (chute_move_ms={}, timeout_buffer_ms={})",
                            chute_move_ms, timing.chute_move_buffer_ms
                        );
                        Some(DistributionStateId::Ready)
                    },
                    Some(ChuteOutcome::Failed(e)) => {
                        error!(
                            "Positioning: chute move failed, retrying in {}ms: {}",
                            timing.pre_move_settle_ms, e
                        );
                        self.retry_later(now, deps);
                        None
                    },
                    Some(ChuteOutcome::Cancelled) | None => {
                        error!("Positioning: chute worker ended without a result");
                        self.retry_later(now, deps);
                        None
                    },
                }
            },
        }
    }

    fn cleanup(&mut self, shared: &mut SharedContext, _deps: &mut DistributionDeps) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
        shared.chute_move_in_progress = false;
    }
}
