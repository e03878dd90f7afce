use super::{ClassificationDeps, ClassificationStateId};
use crate::context::SharedContext;
use crate::piece::Piece;
use crate::state::{Stateful, WaitLog};
use tracing::{debug, info, warn};

/// 检测上料平台上的新零件
///
/// 进入后先等待 `detection_settle_ms`（转盘刚停下，画面还在晃），然后拍基线。
/// 之后每帧计算差分，触发条件连续满足 `detection_hold_ms` 才确认。
#[derive(Debug, Default)]
pub struct Detecting {
    entered_ms: Option<u64>,
    baseline_ready: bool,
    triggered_since_ms: Option<u64>,
    wait: WaitLog,
}

impl Detecting {
    fn stall(&mut self, now: u64, interval: u64, what: &str) {
        if let Some(waited) = self.wait.waiting(now, interval) {
            warn!("Detecting: {} ({} ms)", what, waited);
        }
    }
}

impl Stateful for Detecting {
    type Id = ClassificationStateId;
    type Deps = ClassificationDeps;

    fn step(
        &mut self,
        shared: &mut SharedContext,
        deps: &mut ClassificationDeps,
    ) -> Option<ClassificationStateId> {
        let now = deps.clock.now_ms();
        let interval = deps.timing.waiting_log_interval_ms;
        let entered = *self.entered_ms.get_or_insert(now);

        let frame = deps.feeder_camera.latest_frame();
        if let Some(frame) = &frame {
            deps.detector.push_frame(frame);
        }

        if now.saturating_sub(entered) < deps.timing.detection_settle_ms {
            return None;
        }
        if frame.is_none() {
            self.stall(now, interval, "waiting for feeder camera frame");
            return None;
        }

        if !self.baseline_ready {
            let detection = &deps.detection;
            if !deps
                .detector
                .capture_baseline(&detection.platform_corners, detection.frame_shape)
            {
                self.stall(now, interval, "baseline unavailable");
                return None;
            }
            self.baseline_ready = true;
            self.wait.finish(now);
            info!("Detecting: baseline captured");
            return None;
        }

        let Some(diff) = deps.detector.compute_diff() else {
            self.stall(now, interval, "no diff available");
            return None;
        };
        self.wait.finish(now);

        let triggered = diff.score >= deps.detection.trigger_score
            && diff.hot_pixels >= deps.detection.min_hot_pixels;
        if !triggered {
            if self.triggered_since_ms.take().is_some() {
                debug!(
                    "Detecting: trigger released (score={:.1}, hot_px={})",
                    diff.score, diff.hot_pixels
                );
            }
            return None;
        }

        let since = *self.triggered_since_ms.get_or_insert_with(|| {
            debug!(
                "Detecting: trigger started (score={:.1}, hot_px={})",
                diff.score, diff.hot_pixels
            );
            now
        });
        if now.saturating_sub(since) < deps.timing.detection_hold_ms {
            return None;
        }

        let piece = Piece::new();
        info!(
            "Detecting: piece {} confirmed on platform (score={:.1}, hot_px={})",
            piece.id.short(),
            diff.score,
            diff.hot_pixels
        );
        shared.classification_ready = false;
        shared.publish(&piece);
        if let Err(e) = shared.carousel.add_piece_at_feeder(piece) {
            warn!("Detecting: {}", e);
        }
        Some(ClassificationStateId::Rotating)
    }
}
