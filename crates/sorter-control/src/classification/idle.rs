use super::{ClassificationDeps, ClassificationStateId};
use crate::carousel::CarouselRole;
use crate::context::SharedContext;
use crate::state::Stateful;
use tracing::info;

/// 空闲：上料工位已有零件时直接转动，否则开始检测
#[derive(Debug, Default)]
pub struct Idle;

impl Stateful for Idle {
    type Id = ClassificationStateId;
    type Deps = ClassificationDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        _deps: &mut ClassificationDeps,
    ) -> Option<ClassificationStateId> {
        if let Some(piece) = shared.carousel.piece_at(CarouselRole::Feeder) {
            info!(
                "Idle: piece {} already at feeder, rotating",
                piece.id.short()
            );
            return Some(ClassificationStateId::Rotating);
        }
        Some(ClassificationStateId::Detecting)
    }
}
