use super::{DistributionDeps, DistributionStateId};
use crate::context::SharedContext;
use crate::piece::{PieceId, PieceStage};
use crate::state::Stateful;
use tracing::{info, warn};

/// 零件已落入滑槽，等滑槽稳定后记为已分发
#[derive(Debug, Default)]
pub struct Sending {
    piece: Option<PieceId>,
    started_ms: Option<u64>,
}

impl Stateful for Sending {
    type Id = DistributionStateId;
    type Deps = DistributionDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut DistributionDeps,
    ) -> Option<DistributionStateId> {
        let now = deps.clock.now_ms();
        let started = match self.started_ms {
            Some(started) => started,
            None => {
                self.piece = shared.handoff.take();
                self.started_ms = Some(now);
                now
            },
        };
        if now.saturating_sub(started) < deps.timing.chute_settle_ms {
            return None;
        }

        match self.piece.take() {
            Some(id) => match shared.find_piece_mut(&id) {
                Some(piece) => {
                    piece.stage = PieceStage::Distributed;
                    piece.touch();
                    let snapshot = piece.clone();
                    shared.publish(&snapshot);
                    info!(
                        "Sending: piece {} distributed to {:?}",
                        id.short(),
                        snapshot.destination_bin
                    );
                },
                None => warn!("Sending: piece {} no longer tracked", id.short()),
            },
            None => warn!("Sending: no piece was handed off"),
        }
        // 中间工位还有待认领的零件时，由 Idle/Positioning/Ready 重新放行转盘
        shared.distribution_ready = !shared.intermediate_unclaimed();
        Some(DistributionStateId::Idle)
    }
}
