//! 滑槽定位
//!
//! 滑槽由步进电机经齿轮驱动，一圈分成若干分区，分区之间有立柱占位。
//! 料仓角度：
//!
//! ```text
//! section_start = section_index * (360 / sections) + pillar / 2
//! bin_offset    = (bin_index + 0.5) * (360 / sections - pillar) / bins_in_section
//! angle         = section_start + bin_offset，归一化到 (-180, 180]
//! ```
//!
//! 步进电机的目标是 `angle * gear_ratio` 对应的微步位置，实际发出的是相对当前位置的增量。

use crate::error::ClientError;
use crate::layout::{BinAddress, DistributionLayout};
use crate::stepper::Stepper;
use sorter_tools::ChuteGeometrySection;
use std::time::Duration;
use tracing::info;

/// 滑槽几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChuteGeometry {
    /// 步进电机角度 / 滑槽角度
    pub gear_ratio: f64,
    pub sections_per_layer: usize,
    pub pillar_width_deg: f64,
}

impl ChuteGeometry {
    pub fn deg_per_section(&self) -> f64 {
        360.0 / self.sections_per_layer as f64
    }

    /// 扣除立柱后的分区可用角度
    pub fn usable_deg_per_section(&self) -> f64 {
        self.deg_per_section() - self.pillar_width_deg
    }
}

impl Default for ChuteGeometry {
    fn default() -> Self {
        Self {
            gear_ratio: 4.0,
            sections_per_layer: 6,
            pillar_width_deg: 2.5,
        }
    }
}

impl From<&ChuteGeometrySection> for ChuteGeometry {
    fn from(section: &ChuteGeometrySection) -> Self {
        Self {
            gear_ratio: section.gear_ratio,
            sections_per_layer: section.sections_per_layer,
            pillar_width_deg: section.pillar_width_deg,
        }
    }
}

/// 料仓中心角度，范围 (-180, 180]
pub fn bin_angle(geometry: &ChuteGeometry, bins_in_section: usize, address: BinAddress) -> f64 {
    let section_start =
        address.section_index as f64 * geometry.deg_per_section() + geometry.pillar_width_deg / 2.0;
    let bin_offset = (address.bin_index as f64 + 0.5) * geometry.usable_deg_per_section()
        / bins_in_section as f64;
    normalize_angle(section_start + bin_offset)
}

fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

/// 滑槽
pub struct Chute {
    stepper: Stepper,
    geometry: ChuteGeometry,
    simulate: bool,
}

impl Chute {
    /// `simulate` 为真时只计算与记录，不发出运动命令
    pub fn new(stepper: Stepper, geometry: ChuteGeometry, simulate: bool) -> Self {
        Self {
            stepper,
            geometry,
            simulate,
        }
    }

    pub fn geometry(&self) -> &ChuteGeometry {
        &self.geometry
    }

    pub fn is_simulated(&self) -> bool {
        self.simulate
    }

    pub fn stepper(&self) -> &Stepper {
        &self.stepper
    }

    pub fn stepper_mut(&mut self) -> &mut Stepper {
        &mut self.stepper
    }

    /// 当前滑槽角度（由步进电机逻辑位置推算）
    pub fn current_angle(&self) -> f64 {
        self.stepper.position_degrees() / self.geometry.gear_ratio
    }

    /// # 错误
    /// - `ClientError::InvalidBin`: 地址不在布局内
    pub fn angle_for_bin(
        &self,
        layout: &DistributionLayout,
        address: BinAddress,
    ) -> Result<f64, ClientError> {
        let bins = layout
            .bins_in_section(address)
            .filter(|_| layout.contains(address))
            .ok_or(ClientError::InvalidBin(address))?;
        Ok(bin_angle(&self.geometry, bins, address))
    }

    /// 到达目标角度所需的微步增量
    pub fn steps_to_angle(&self, target: f64) -> i64 {
        let target_steps = (target * self.geometry.gear_ratio / 360.0
            * f64::from(self.stepper.total_steps_per_rev()))
        .round() as i64;
        target_steps - self.stepper.position_steps()
    }

    /// 发出运动命令并返回估算时长（毫秒）
    pub fn move_to_angle(&mut self, target: f64) -> Result<u64, ClientError> {
        let current = self.current_angle();
        let delta = self.steps_to_angle(target);
        let estimated_ms = self.stepper.estimate_move_ms(delta);

        if self.simulate {
            info!(
                "Chute [simulated] would move from {:.1}° to {:.1}° (delta_steps={}, est_ms={})",
                current, target, delta, estimated_ms
            );
            return Ok(estimated_ms);
        }

        info!(
            "Chute moving from {:.1}° to {:.1}° (delta_steps={}, est_ms={})",
            current, target, delta, estimated_ms
        );
        self.stepper.move_steps(delta)?;
        Ok(estimated_ms)
    }

    pub fn move_to_bin(
        &mut self,
        layout: &DistributionLayout,
        address: BinAddress,
    ) -> Result<u64, ClientError> {
        let target = self.angle_for_bin(layout, address)?;
        self.move_to_angle(target)
    }

    /// 运动并等待完成，超时为估算时长加 `timeout_buffer`（至少 1ms）
    pub fn move_to_angle_blocking(
        &mut self,
        target: f64,
        timeout_buffer: Duration,
    ) -> Result<u64, ClientError> {
        let current = self.current_angle();
        let delta = self.steps_to_angle(target);
        let estimated_ms = self.stepper.estimate_move_ms(delta);
        let timeout_ms = (estimated_ms + timeout_buffer.as_millis() as u64).max(1);

        if self.simulate {
            info!(
                "Chute [simulated] would move from {:.1}° to {:.1}° (delta_steps={}, est_ms={}, timeout_ms={})",
                current, target, delta, estimated_ms, timeout_ms
            );
            return Ok(estimated_ms);
        }

        info!(
            "Chute moving (blocking) from {:.1}° to {:.1}° (delta_steps={}, est_ms={}, timeout_ms={})",
            current, target, delta, estimated_ms, timeout_ms
        );
        self.stepper
            .move_steps_blocking(delta, Duration::from_millis(timeout_ms))?;
        Ok(estimated_ms)
    }

    pub fn move_to_bin_blocking(
        &mut self,
        layout: &DistributionLayout,
        address: BinAddress,
        timeout_buffer: Duration,
    ) -> Result<u64, ClientError> {
        let target = self.angle_for_bin(layout, address)?;
        self.move_to_angle_blocking(target, timeout_buffer)
    }

    /// 回到 0°
    pub fn home(&mut self) -> Result<u64, ClientError> {
        info!("Chute homing to zero");
        self.move_to_angle(0.0)
    }
}
