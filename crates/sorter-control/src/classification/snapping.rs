use super::{ClassificationDeps, ClassificationStateId};
use crate::carousel::CarouselRole;
use crate::context::SharedContext;
use crate::piece::ClassificationResult;
use crate::state::{Stateful, WaitLog};
use crossbeam_channel::bounded;
use tracing::{info, warn};

/// 拍摄识别工位的零件并提交识别
#[derive(Debug, Default)]
pub struct Snapping {
    entered_ms: Option<u64>,
    wait: WaitLog,
}

impl Stateful for Snapping {
    type Id = ClassificationStateId;
    type Deps = ClassificationDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut ClassificationDeps,
    ) -> Option<ClassificationStateId> {
        let now = deps.clock.now_ms();
        let entered = *self.entered_ms.get_or_insert_with(|| {
            info!("Snapping: waiting for camera settle");
            now
        });
        if now.saturating_sub(entered) < deps.timing.snapping_settle_ms {
            return None;
        }

        let Some(id) = shared
            .carousel
            .piece_at(CarouselRole::Classification)
            .map(|piece| piece.id.clone())
        else {
            warn!("Snapping: no piece at classification position");
            shared.classification_ready = true;
            return Some(ClassificationStateId::Idle);
        };

        let Some((top, bottom)) = deps.cameras.capture_pair() else {
            if let Some(waited) = self
                .wait
                .waiting(now, deps.timing.waiting_log_interval_ms)
            {
                warn!("Snapping: classification frames unavailable ({} ms)", waited);
            }
            return None;
        };
        self.wait.finish(now);

        let saved = match deps.images.save(&id, &top, &bottom) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Snapping: failed to save images for {}: {}", id.short(), e);
                None
            },
        };

        if let Some(piece) = shared.carousel.find_mut(&id) {
            if let Some((top_name, bottom_name)) = saved {
                piece.thumbnail = Some(top_name.clone());
                piece.top_image = Some(top_name);
                piece.bottom_image = Some(bottom_name);
            }
        }
        if let Err(e) = shared.carousel.mark_pending_classification(&id) {
            warn!("Snapping: {}", e);
        }
        if let Some(piece) = shared.carousel.piece_at(CarouselRole::Classification) {
            shared.publish(piece);
        }

        let (result_tx, result_rx) = bounded::<ClassificationResult>(1);
        let short = id.short().to_string();
        deps.identifier.classify(
            top,
            bottom,
            Box::new(move |result| {
                info!("Snapping: classified {} -> {:?}", short, result);
                let _ = result_tx.send(result);
            }),
        );
        deps.track_identification(id, result_rx);

        shared.classification_ready = true;
        Some(ClassificationStateId::Idle)
    }
}
