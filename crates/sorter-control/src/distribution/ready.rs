use super::{DistributionDeps, DistributionStateId};
use crate::context::SharedContext;
use crate::state::Stateful;
use tracing::info;

/// 滑槽已就位，等待转盘把零件送到出口
#[derive(Debug, Default)]
pub struct Ready {
    announced: bool,
}

impl Stateful for Ready {
    type Id = DistributionStateId;
    type Deps = DistributionDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        _deps: &mut DistributionDeps,
    ) -> Option<DistributionStateId> {
        if !self.announced {
            self.announced = true;
            shared.distribution_ready = true;
            info!("Ready: chute positioned, waiting for drop");
        }
        shared.handoff.is_some().then_some(DistributionStateId::Sending)
    }
}
