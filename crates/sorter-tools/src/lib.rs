//! # Sorter Tools - 配置、持久化与分拣规则
//!
//! **依赖原则**: 不依赖驱动层与轴层，避免引入硬件依赖
//!
//! ## 包含模块
//!
//! - `config` - TOML 配置（每个段都有默认值，部分配置文件也合法）
//! - `store` - 机器状态持久化（轴位置、舵机角度、料仓分类），每次写入都原子落盘
//! - `profile` - 分拣规则（零件 → 分类）

pub mod config;
pub mod profile;
pub mod store;

pub use config::{
    BusSection, ChuteGeometrySection, ConfigError, DetectionSection, DoorSection, FeederSection,
    LayerSection, SorterConfig, StepperSection, TimingSection,
};
pub use profile::{
    JsonSortingProfile, MISC_CATEGORY, ProfileError, SortingProfile, StaticSortingProfile,
};
pub use store::{BinCategories, JsonFileStore, MachineData, MachineStore, MemoryStore, StoreError};
