use super::{DistributionDeps, DistributionStateId};
use crate::carousel::CarouselRole;
use crate::context::SharedContext;
use crate::piece::PieceStage;
use crate::state::{Stateful, WaitLog};
use sorter_tools::MISC_CATEGORY;
use tracing::{error, info, warn};

/// 等待中间工位出现有识别结论的零件，并为它分配料仓
#[derive(Debug, Default)]
pub struct Idle {
    wait: WaitLog,
}

impl Stateful for Idle {
    type Id = DistributionStateId;
    type Deps = DistributionDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut DistributionDeps,
    ) -> Option<DistributionStateId> {
        let now = deps.clock.now_ms();
        let Some(piece) = shared
            .carousel
            .piece_at(CarouselRole::Intermediate)
            .filter(|piece| piece.is_ready_for_distribution())
        else {
            self.wait.finish(now);
            return None;
        };
        shared.distribution_ready = false;

        if piece.stage == PieceStage::Distributing && piece.destination().is_some() {
            return Some(DistributionStateId::Positioning);
        }

        let category = piece
            .part_id
            .as_deref()
            .map(|part_id| deps.profile.category_for_part(part_id))
            .unwrap_or_else(|| MISC_CATEGORY.to_string());

        let address = match deps.layout.find_or_assign(&category, deps.store.as_ref()) {
            Ok(Some(address)) => address,
            Ok(None) => {
                if let Some(waited) = self
                    .wait
                    .waiting(now, deps.timing.waiting_log_interval_ms)
                {
                    warn!(
                        "Idle: no available bins for category '{}' ({} ms)",
                        category, waited
                    );
                }
                return None;
            },
            Err(e) => {
                error!("Idle: bin assignment for '{}' failed: {}", category, e);
                return None;
            },
        };
        self.wait.finish(now);

        let piece = shared.carousel.piece_at_mut(CarouselRole::Intermediate)?;
        piece.stage = PieceStage::Distributing;
        piece.category_id = Some(category.clone());
        piece.set_destination(address);
        piece.touch();
        let snapshot = piece.clone();
        shared.publish(&snapshot);

        info!(
            "Idle: piece {} ({}) -> bin {}",
            snapshot.id.short(),
            category,
            address
        );
        Some(DistributionStateId::Positioning)
    }
}
