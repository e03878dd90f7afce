use super::{ClassificationDeps, ClassificationStateId};
use crate::carousel::CarouselRole;
use crate::context::SharedContext;
use crate::piece::PieceStage;
use crate::state::{Stateful, WaitLog};
use crate::task::{BackgroundTask, TaskPoll};
use sorter_client::ClientError;
use std::time::Duration;
use tracing::{error, info, warn};

/// 后台转动的结果
#[derive(Debug)]
pub enum RotateOutcome {
    Done,
    /// 状态已离开，没有发出命令
    Cancelled,
    Failed(ClientError),
}

/// 转动转盘一个工位
#[derive(Default)]
pub struct Rotating {
    task: Option<BackgroundTask<RotateOutcome>>,
    retry_at_ms: Option<u64>,
    wait: WaitLog,
}

impl Rotating {
    /// 中间工位的零件已有识别结论时，必须等分发流水线认领它并就位滑槽
    fn must_wait_for_distribution(shared: &SharedContext) -> bool {
        let gated = shared
            .carousel
            .piece_at(CarouselRole::Intermediate)
            .is_some_and(|piece| piece.is_ready_for_distribution());
        gated && (!shared.distribution_ready || shared.intermediate_unclaimed())
    }

    fn start(&mut self, deps: &ClassificationDeps) {
        let stepper = deps.carousel_stepper.clone();
        let degrees = deps.timing.rotate_degrees;
        let buffer_ms = deps.timing.rotate_timeout_buffer_ms;
        let spawned = BackgroundTask::spawn("carousel-rotate", move |token| {
            if token.is_cancelled() {
                return RotateOutcome::Cancelled;
            }
            let mut stepper = stepper.lock();
            let timeout =
                Duration::from_millis(stepper.estimate_move_degrees_ms(degrees) + buffer_ms);
            match stepper.rotate_blocking(degrees, timeout) {
                Ok(_) => RotateOutcome::Done,
                Err(e) => RotateOutcome::Failed(e),
            }
        });
        match spawned {
            Ok(task) => {
                info!("Rotating: starting rotation ({}°)", degrees);
                self.task = Some(task);
            },
            Err(e) => error!("Rotating: failed to spawn rotation worker: {}", e),
        }
    }

    fn complete(&mut self, shared: &mut SharedContext) -> ClassificationStateId {
        info!("Rotating: rotation complete");
        if let Some(exited) = shared.carousel.rotate() {
            info!("Rotating: piece {} exited carousel", exited.id.short());
            shared.record_exited(exited);
        }

        if let Some(piece) = shared.carousel.piece_at(CarouselRole::Exit) {
            let id = piece.id.clone();
            let stage = piece.stage;
            shared.distribution_ready = false;
            if stage == PieceStage::Distributing {
                info!("Rotating: piece {} dropped into chute", id.short());
                shared.handoff = Some(id);
            } else {
                warn!(
                    "Rotating: piece {} reached exit without a destination (stage={:?})",
                    id.short(),
                    stage
                );
            }
        }

        if let Some(piece) = shared.carousel.piece_at(CarouselRole::Classification) {
            info!("Rotating: piece {} at classification position", piece.id.short());
            ClassificationStateId::Snapping
        } else {
            info!("Rotating: no piece at classification, returning to idle");
            shared.classification_ready = true;
            ClassificationStateId::Idle
        }
    }
}

impl Stateful for Rotating {
    type Id = ClassificationStateId;
    type Deps = ClassificationDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut ClassificationDeps,
    ) -> Option<ClassificationStateId> {
        let now = deps.clock.now_ms();

        if self.task.is_none() {
            if self.retry_at_ms.is_some_and(|at| now < at) {
                return None;
            }
            if Self::must_wait_for_distribution(shared) {
                if let Some(waited) = self
                    .wait
                    .waiting(now, deps.timing.waiting_log_interval_ms)
                {
                    info!("Rotating: waiting for distribution_ready ({} ms)", waited);
                }
                return None;
            }
            if let Some(waited) = self.wait.finish(now) {
                info!("Rotating: distribution_ready after waiting {} ms", waited);
            }
            self.retry_at_ms = None;
            self.start(deps);
            return None;
        }

        let task = self.task.as_mut()?;
        match task.poll() {
            TaskPoll::Pending => None,
            TaskPoll::Done(RotateOutcome::Done) => {
                self.task = None;
                Some(self.complete(shared))
            },
            TaskPoll::Done(RotateOutcome::Cancelled) => {
                self.task = None;
                None
            },
            TaskPoll::Done(RotateOutcome::Failed(e)) => {
                error!("Rotating: carousel rotation failed: {}", e);
                self.task = None;
                self.retry_at_ms = Some(now + deps.timing.rotate_timeout_buffer_ms);
                None
            },
            TaskPoll::Lost => {
                error!("Rotating: rotation worker died without a result");
                self.task = None;
                self.retry_at_ms = Some(now + deps.timing.rotate_timeout_buffer_ms);
                None
            },
        }
    }

    fn cleanup(&mut self, _shared: &mut SharedContext, _deps: &mut ClassificationDeps) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
        self.retry_at_ms = None;
    }
}
