//! 无硬件运行用的模拟协作者
//!
//! 模拟检测器按随机间隔产生"零件出现"的触发，模拟识别服务在后台线程延迟后
//! 随机返回零件编号或"未找到"。时间基于 `Instant`，与控制循环的时钟无关。

use crate::classification::ClassificationCollaborators;
use crate::piece::ClassificationResult;
use crate::vision::{
    ClassificationCameras, DiffScore, Detector, FeederCamera, Frame, IdentifyCallback, Identifier,
    ImageStore, NullImageStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 模拟参数
#[derive(Debug, Clone)]
pub struct SimVisionConfig {
    pub frame_width: u32,
    pub frame_height: u32,
    /// 两个零件之间的间隔（毫秒）
    pub piece_interval_ms: Range<u64>,
    /// 单次触发持续时间（毫秒），需长于检测保持时间
    pub trigger_ms: Range<u64>,
    /// 识别延迟（毫秒）
    pub identify_latency_ms: Range<u64>,
    /// 识别返回"未找到"的概率
    pub not_found_ratio: f64,
    pub part_ids: Vec<String>,
    pub seed: Option<u64>,
}

impl Default for SimVisionConfig {
    fn default() -> Self {
        Self {
            frame_width: 64,
            frame_height: 48,
            piece_interval_ms: 4_000..9_000,
            trigger_ms: 1_500..2_500,
            identify_latency_ms: 300..1_500,
            not_found_ratio: 0.1,
            part_ids: ["3001", "3003", "3020", "3023", "3710", "2780"]
                .into_iter()
                .map(String::from)
                .collect(),
            seed: None,
        }
    }
}

impl SimVisionConfig {
    fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }

    fn frame(&self, rng: &mut StdRng, channels: u8) -> Frame {
        let len = self.frame_width as usize * self.frame_height as usize * channels as usize;
        let data: Vec<u8> = (0..len).map(|_| rng.gen_range(90..110)).collect();
        let frame = if channels == 3 {
            Frame::rgb(self.frame_width, self.frame_height, data)
        } else {
            Frame::gray(self.frame_width, self.frame_height, data)
        };
        frame.unwrap_or_else(|| Frame {
            width: 0,
            height: 0,
            channels,
            data: Arc::from(Vec::new()),
        })
    }
}

fn pick(rng: &mut StdRng, range: &Range<u64>) -> u64 {
    if range.is_empty() {
        range.start
    } else {
        rng.gen_range(range.clone())
    }
}

pub struct SimFeederCamera {
    config: SimVisionConfig,
    rng: StdRng,
}

impl SimFeederCamera {
    pub fn new(config: SimVisionConfig) -> Self {
        let rng = config.rng(1);
        Self { config, rng }
    }
}

impl FeederCamera for SimFeederCamera {
    fn latest_frame(&mut self) -> Option<Frame> {
        Some(self.config.frame(&mut self.rng, 1))
    }
}

pub struct SimClassificationCameras {
    config: SimVisionConfig,
    rng: StdRng,
}

impl SimClassificationCameras {
    pub fn new(config: SimVisionConfig) -> Self {
        let rng = config.rng(2);
        Self { config, rng }
    }
}

impl ClassificationCameras for SimClassificationCameras {
    fn capture_pair(&mut self) -> Option<(Frame, Frame)> {
        let top = self.config.frame(&mut self.rng, 3);
        let bottom = self.config.frame(&mut self.rng, 3);
        Some((top, bottom))
    }
}

/// 随机触发的检测器
pub struct SimDetector {
    config: SimVisionConfig,
    rng: StdRng,
    next_piece_at: Option<Instant>,
    trigger_until: Option<Instant>,
}

impl SimDetector {
    pub fn new(config: SimVisionConfig) -> Self {
        let rng = config.rng(3);
        Self {
            config,
            rng,
            next_piece_at: None,
            trigger_until: None,
        }
    }

    fn schedule_next(&mut self, now: Instant) {
        let gap = pick(&mut self.rng, &self.config.piece_interval_ms);
        self.next_piece_at = Some(now + Duration::from_millis(gap));
    }
}

impl Detector for SimDetector {
    fn push_frame(&mut self, _frame: &Frame) {}

    fn capture_baseline(&mut self, _corners: &[[f64; 2]], _shape: [u32; 2]) -> bool {
        self.trigger_until = None;
        self.schedule_next(Instant::now());
        true
    }

    fn compute_diff(&mut self) -> Option<DiffScore> {
        let now = Instant::now();
        let next = self.next_piece_at?;
        if self.trigger_until.is_none() && now >= next {
            let hold = pick(&mut self.rng, &self.config.trigger_ms);
            self.trigger_until = Some(now + Duration::from_millis(hold));
            debug!("Sim detector: piece appears for {} ms", hold);
        }
        match self.trigger_until {
            Some(until) if now < until => Some(DiffScore {
                score: self.rng.gen_range(25.0..45.0),
                hot_pixels: self.rng.gen_range(200..800),
            }),
            Some(_) => {
                self.trigger_until = None;
                self.schedule_next(now);
                Some(DiffScore {
                    score: 0.0,
                    hot_pixels: 0,
                })
            },
            None => Some(DiffScore {
                score: self.rng.gen_range(0.0..3.0),
                hot_pixels: self.rng.gen_range(0..10),
            }),
        }
    }
}

/// 后台线程延迟回调的识别服务
pub struct SimIdentifier {
    config: SimVisionConfig,
}

impl SimIdentifier {
    pub fn new(config: SimVisionConfig) -> Self {
        Self { config }
    }
}

impl Identifier for SimIdentifier {
    fn classify(&self, _top: Frame, _bottom: Frame, on_result: IdentifyCallback) {
        let mut rng = self.config.rng(rand::random::<u64>());
        let latency = pick(&mut rng, &self.config.identify_latency_ms);
        let result = if self.config.part_ids.is_empty()
            || rng.gen_bool(self.config.not_found_ratio.clamp(0.0, 1.0))
        {
            ClassificationResult::NotFound
        } else {
            let part_id = self.config.part_ids[rng.gen_range(0..self.config.part_ids.len())].clone();
            ClassificationResult::Classified {
                part_id,
                confidence: Some(rng.gen_range(0.6..0.99)),
            }
        };
        let spawned = thread::Builder::new()
            .name("sim-identifier".to_string())
            .spawn(move || {
                thread::sleep(Duration::from_millis(latency));
                on_result(result);
            });
        if let Err(e) = spawned {
            // 回调随闭包一起被丢弃，控制线程会把零件记为 unknown
            warn!("Sim identifier could not spawn worker: {}", e);
        }
    }
}

/// 组装全套模拟协作者
pub fn sim_collaborators(
    config: SimVisionConfig,
    images: Option<Box<dyn ImageStore>>,
) -> ClassificationCollaborators {
    ClassificationCollaborators {
        feeder_camera: Box::new(SimFeederCamera::new(config.clone())),
        cameras: Box::new(SimClassificationCameras::new(config.clone())),
        detector: Box::new(SimDetector::new(config.clone())),
        identifier: Arc::new(SimIdentifier::new(config)),
        images: images.unwrap_or_else(|| Box::new(NullImageStore)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn fast() -> SimVisionConfig {
        SimVisionConfig {
            piece_interval_ms: 0..1,
            trigger_ms: 50..51,
            identify_latency_ms: 0..1,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_detector_triggers_after_baseline() {
        let mut detector = SimDetector::new(fast());
        assert!(detector.compute_diff().is_none());
        assert!(detector.capture_baseline(&[], [64, 48]));
        thread::sleep(Duration::from_millis(2));
        let diff = detector.compute_diff().unwrap();
        assert!(diff.score >= 25.0);
        assert!(diff.hot_pixels >= 200);
    }

    #[test]
    fn test_identifier_calls_back_once() {
        let identifier = SimIdentifier::new(fast());
        let mut cameras = SimClassificationCameras::new(fast());
        let (top, bottom) = cameras.capture_pair().unwrap();
        assert_eq!(top.channels, 3);

        let (tx, rx) = bounded(1);
        identifier.classify(
            top,
            bottom,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            result,
            ClassificationResult::Classified { .. } | ClassificationResult::NotFound
        ));
    }
}
