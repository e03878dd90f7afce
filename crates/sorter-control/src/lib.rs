//! 分拣控制层
//!
//! 零件从上料平台进入转盘，经过识别工位拍照识别，最后由滑槽送入对应料仓。
//! 本 crate 负责：
//! - `Piece` / `Carousel` - 零件记录与转盘工位模型
//! - 三条状态机：上料（`feeder`）、分类（`classification`）、分发（`distribution`）
//! - `Coordinator` - 控制循环，每个 tick 依次推进三条状态机
//! - `vision` - 相机、检测器、识别服务等协作者接口
//! - `sim` - 无硬件运行时的模拟协作者
//!
//! 状态机之间只通过 [`SharedContext`] 交换信息，时间统一从 [`Clock`] 读取。

pub mod carousel;
pub mod classification;
mod clock;
mod context;
pub mod coordinator;
pub mod distribution;
pub mod feeder;
pub mod metrics;
pub mod piece;
pub mod sim;
pub mod state;
pub mod task;
pub mod vision;

#[cfg(test)]
pub(crate) mod test_support;

pub use carousel::{Carousel, CarouselError, CarouselRole};
pub use classification::{
    ClassificationCollaborators, ClassificationDeps, ClassificationMachine, ClassificationStateId,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use context::{EXITED_HISTORY_LIMIT, SharedContext};
pub use coordinator::{Collaborators, ControlError, Coordinator, CoordinatorBuilder, CoordinatorStatus};
pub use distribution::{DistributionDeps, DistributionMachine, DistributionStateId, DoorBank};
pub use feeder::{FeederDeps, FeederMachine, FeederStateId, PulseSettings};
pub use metrics::{DurationStats, StepTimings};
pub use piece::{
    ClassificationResult, ClassificationStatus, Piece, PieceEvent, PieceId, PieceStage,
};
pub use sim::{SimVisionConfig, sim_collaborators};
pub use state::{MachineState, StateMachine, Stateful, WaitLog};
pub use task::{BackgroundTask, CancellationToken, TaskPoll};
pub use vision::{
    ClassificationCameras, DiffScore, Detector, DirectoryImageStore, FeederCamera, Frame,
    HeatmapDetector, IdentifyCallback, Identifier, ImageStore, NullImageStore,
};
