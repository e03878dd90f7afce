//! # 机器状态持久化
//!
//! 步进电机逻辑位置、舵机角度与料仓分类分配都保存在一个 JSON 文档里。
//! 每次写入先写临时文件、fsync，再 rename 覆盖，返回前数据已经落盘。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// 料仓分类表：`[layer][section][bin]`，`None` 表示尚未分配
pub type BinCategories = Vec<Vec<Vec<Option<String>>>>;

/// 持久化错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode store document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to persist store file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// 持久化接口
///
/// 所有 setter 在返回前完成持久化。
pub trait MachineStore: Send + Sync {
    /// 步进电机逻辑位置（微步），未记录时为 0
    fn stepper_position(&self, name: &str) -> i64;

    fn set_stepper_position(&self, name: &str, steps: i64) -> Result<(), StoreError>;

    /// 舵机角度，未记录时为 `None`
    fn servo_angle(&self, name: &str) -> Option<i32>;

    fn set_servo_angle(&self, name: &str, angle: i32) -> Result<(), StoreError>;

    /// 料仓分类表，未记录时为 `None`
    fn bin_categories(&self) -> Option<BinCategories>;

    fn set_bin_categories(&self, categories: &BinCategories) -> Result<(), StoreError>;
}

/// 持久化文档
///
/// 未识别的键原样保留，写回时不会丢失其他组件的数据。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    pub stepper_positions: BTreeMap<String, i64>,
    pub servo_positions: BTreeMap<String, i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_categories: Option<BinCategories>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// JSON 文件存储
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<MachineData>,
}

impl JsonFileStore {
    /// 打开存储文件
    ///
    /// 文件不存在时从空文档开始；内容损坏时记录警告并从空文档开始，
    /// 下一次写入会覆盖它。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<MachineData>(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Store file {} is unreadable ({}), starting empty", path.display(), e);
                    MachineData::default()
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MachineData::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前文档的副本
    pub fn snapshot(&self) -> MachineData {
        self.data.lock().clone()
    }

    /// 修改文档并落盘；落盘失败时内存中的文档保持不变
    fn update(&self, apply: impl FnOnce(&mut MachineData)) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        apply(&mut next);
        self.write_atomic(&next)?;
        *data = next;
        Ok(())
    }

    fn write_atomic(&self, data: &MachineData) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, data)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path)?;
        debug!("Store written to {}", self.path.display());
        Ok(())
    }
}

impl MachineStore for JsonFileStore {
    fn stepper_position(&self, name: &str) -> i64 {
        self.data
            .lock()
            .stepper_positions
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    fn set_stepper_position(&self, name: &str, steps: i64) -> Result<(), StoreError> {
        self.update(|data| {
            data.stepper_positions.insert(name.to_string(), steps);
        })
    }

    fn servo_angle(&self, name: &str) -> Option<i32> {
        self.data.lock().servo_positions.get(name).copied()
    }

    fn set_servo_angle(&self, name: &str, angle: i32) -> Result<(), StoreError> {
        self.update(|data| {
            data.servo_positions.insert(name.to_string(), angle);
        })
    }

    fn bin_categories(&self) -> Option<BinCategories> {
        self.data.lock().bin_categories.clone()
    }

    fn set_bin_categories(&self, categories: &BinCategories) -> Result<(), StoreError> {
        self.update(|data| {
            data.bin_categories = Some(categories.clone());
        })
    }
}

/// 内存存储（测试与模拟运行）
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<MachineData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MachineData {
        self.data.lock().clone()
    }
}

impl MachineStore for MemoryStore {
    fn stepper_position(&self, name: &str) -> i64 {
        self.data
            .lock()
            .stepper_positions
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    fn set_stepper_position(&self, name: &str, steps: i64) -> Result<(), StoreError> {
        self.data
            .lock()
            .stepper_positions
            .insert(name.to_string(), steps);
        Ok(())
    }

    fn servo_angle(&self, name: &str) -> Option<i32> {
        self.data.lock().servo_positions.get(name).copied()
    }

    fn set_servo_angle(&self, name: &str, angle: i32) -> Result<(), StoreError> {
        self.data
            .lock()
            .servo_positions
            .insert(name.to_string(), angle);
        Ok(())
    }

    fn bin_categories(&self) -> Option<BinCategories> {
        self.data.lock().bin_categories.clone()
    }

    fn set_bin_categories(&self, categories: &BinCategories) -> Result<(), StoreError> {
        self.data.lock().bin_categories = Some(categories.clone());
        Ok(())
    }
}
