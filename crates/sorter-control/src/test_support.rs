//! 状态机单元测试用的替身

use crate::classification::ClassificationCollaborators;
use crate::piece::ClassificationResult;
use crate::vision::{
    ClassificationCameras, DiffScore, Detector, FeederCamera, Frame, IdentifyCallback, Identifier,
    NullImageStore,
};
use parking_lot::Mutex;
use sorter_client::{MotionProfile, RetryPolicy, Stepper, StepperPins, StepperSettings};
use sorter_driver::{CommandSink, DriverError};
use sorter_protocol::{CommandId, ControllerCommand};
use sorter_tools::MemoryStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// 记录命令；阻塞命令默认立即成功，可以预设若干次超时
#[derive(Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<ControllerCommand>>,
    blocking: AtomicUsize,
    failures: AtomicUsize,
    next_id: AtomicU32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<ControllerCommand> {
        self.commands.lock().clone()
    }

    pub fn blocking_count(&self) -> usize {
        self.blocking.load(Ordering::SeqCst)
    }

    pub fn fail_next_blocking(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

impl CommandSink for RecordingSink {
    fn submit(&self, command: ControllerCommand) -> Result<CommandId, DriverError> {
        self.commands.lock().push(command);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn submit_blocking(
        &self,
        command: ControllerCommand,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        self.commands.lock().push(command);
        self.blocking.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DriverError::Timeout {
                id,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(format!("T done id={}", id))
    }

    fn is_running(&self) -> bool {
        true
    }
}

pub fn stepper(name: &str, step_pin: u8, sink: &Arc<RecordingSink>) -> Stepper {
    let settings = StepperSettings {
        name: name.to_string(),
        pins: StepperPins {
            step: step_pin,
            dir: step_pin + 1,
            enable: step_pin + 2,
        },
        steps_per_rev: 200,
        microstepping: 8,
        profile: MotionProfile::new(400),
        retry: RetryPolicy {
            retries: 1,
            delay: Duration::ZERO,
        },
    };
    let sink: Arc<dyn CommandSink> = sink.clone();
    Stepper::new(settings, sink, Arc::new(MemoryStore::new())).unwrap()
}

pub fn frame() -> Frame {
    Frame::gray(4, 4, vec![0u8; 16]).unwrap()
}

/// 各替身的遥控把手
#[derive(Clone, Default)]
pub struct FakeVision {
    pub feeder_frames: Arc<AtomicBool>,
    pub classification_frames: Arc<AtomicBool>,
    pub baseline_ok: Arc<AtomicBool>,
    pub diff: Arc<Mutex<Option<DiffScore>>>,
    pub pending: Arc<Mutex<Vec<IdentifyCallback>>>,
}

impl FakeVision {
    /// 相机可用、基线可拍、画面静止
    pub fn ready() -> Self {
        let vision = Self::default();
        vision.feeder_frames.store(true, Ordering::SeqCst);
        vision.classification_frames.store(true, Ordering::SeqCst);
        vision.baseline_ok.store(true, Ordering::SeqCst);
        vision.set_diff(0.0, 0);
        vision
    }

    pub fn set_diff(&self, score: f64, hot_pixels: u32) {
        *self.diff.lock() = Some(DiffScore { score, hot_pixels });
    }

    pub fn trigger(&self) {
        self.set_diff(40.0, 500);
    }

    pub fn release(&self) {
        self.set_diff(0.0, 0);
    }

    /// 依次回调所有待处理的识别请求
    pub fn complete_identifications(&self, result: ClassificationResult) -> usize {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        let count = pending.len();
        for callback in pending {
            callback(result.clone());
        }
        count
    }

    /// 丢弃所有待处理请求（回调永远不会被调用）
    pub fn drop_identifications(&self) {
        self.pending.lock().clear();
    }

    pub fn collaborators(&self) -> ClassificationCollaborators {
        ClassificationCollaborators {
            feeder_camera: Box::new(FakeFeederCamera(self.clone())),
            cameras: Box::new(FakeCameras(self.clone())),
            detector: Box::new(FakeDetector(self.clone())),
            identifier: Arc::new(FakeIdentifier(self.clone())),
            images: Box::new(NullImageStore),
        }
    }
}

struct FakeFeederCamera(FakeVision);

impl FeederCamera for FakeFeederCamera {
    fn latest_frame(&mut self) -> Option<Frame> {
        self.0.feeder_frames.load(Ordering::SeqCst).then(frame)
    }
}

struct FakeCameras(FakeVision);

impl ClassificationCameras for FakeCameras {
    fn capture_pair(&mut self) -> Option<(Frame, Frame)> {
        self.0
            .classification_frames
            .load(Ordering::SeqCst)
            .then(|| (frame(), frame()))
    }
}

struct FakeDetector(FakeVision);

impl Detector for FakeDetector {
    fn push_frame(&mut self, _frame: &Frame) {}

    fn capture_baseline(&mut self, _corners: &[[f64; 2]], _shape: [u32; 2]) -> bool {
        self.0.baseline_ok.load(Ordering::SeqCst)
    }

    fn compute_diff(&mut self) -> Option<DiffScore> {
        *self.0.diff.lock()
    }
}

struct FakeIdentifier(FakeVision);

impl Identifier for FakeIdentifier {
    fn classify(&self, _top: Frame, _bottom: Frame, on_result: IdentifyCallback) {
        self.0.pending.lock().push(on_result);
    }
}
