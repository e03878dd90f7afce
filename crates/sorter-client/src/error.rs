//! 轴层错误类型定义

use crate::layout::BinAddress;
use sorter_driver::DriverError;
use sorter_tools::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// 总线错误（未重试）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 持久化失败
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 阻塞运动重试耗尽，携带最后一次错误
    #[error("Axis '{axis}' move failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        axis: String,
        attempts: u32,
        #[source]
        source: DriverError,
    },

    /// 料仓地址不在布局内
    #[error("Bin address {0} is outside the layout")]
    InvalidBin(BinAddress),

    /// 布局或几何参数无效
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),
}

impl ClientError {
    /// 底层总线错误（包括重试耗尽后的最后一次错误）
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            ClientError::Driver(e) | ClientError::RetriesExhausted { source: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.driver_error().is_some_and(DriverError::is_timeout)
    }
}
