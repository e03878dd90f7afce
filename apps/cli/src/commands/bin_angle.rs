//! bin-angle 命令
//!
//! 计算料仓中心对应的滑槽角度；`--go` 时把滑槽转过去

use crate::setup::{self, Options};
use crate::validation;
use anyhow::{Context, Result};
use clap::Args;
use sorter_client::{
    BinAddress, Chute, ChuteGeometry, DistributionLayout, Stepper, StepperSettings, bin_angle,
};
use sorter_driver::CommandSink;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct BinAngleCommand {
    /// 层号（从 0 开始）
    pub layer: usize,

    /// 分区号
    pub section: usize,

    /// 分区内的料仓号
    pub bin: usize,

    /// 把滑槽转到该料仓
    #[arg(long)]
    pub go: bool,

    /// 滑槽运动的超时余量（毫秒）
    #[arg(long, default_value_t = 5_000)]
    pub timeout_buffer_ms: u64,
}

impl BinAngleCommand {
    pub fn address(&self) -> BinAddress {
        BinAddress::new(self.layer, self.section, self.bin)
    }

    pub fn execute(&self, options: &Options) -> Result<()> {
        let config = options.load_config()?;
        let layout = DistributionLayout::from_config(&config.layers)?;
        let geometry = ChuteGeometry::from(&config.chute_geometry);
        let address = self.address();
        validation::check_bin(&layout, address)?;

        let bins = layout
            .bins_in_section(address)
            .context("Bin section missing from layout")?;
        let angle = bin_angle(&geometry, bins, address);
        println!(
            "📐 料仓 {}: 滑槽 {:.2}°（电机 {:.2}°）",
            address,
            angle,
            angle * geometry.gear_ratio
        );

        if !self.go {
            return Ok(());
        }

        let bus = setup::open_bus(&config)?;
        let store = setup::open_store(&config)?;
        let sink: Arc<dyn CommandSink> = bus.clone();
        let stepper = Stepper::new(StepperSettings::from_section("chute", &config.chute), sink, store)
            .context("Failed to initialise chute stepper")?;
        let mut chute = Chute::new(stepper, geometry, config.simulate_chute);
        let from = chute.current_angle();
        let moved_ms = chute
            .move_to_bin_blocking(
                &layout,
                address,
                Duration::from_millis(self.timeout_buffer_ms),
            )
            .with_context(|| format!("Chute move to bin {} failed", address))?;
        println!(
            "✅ 滑槽 {:.2}° → {:.2}°（{} ms）",
            from,
            chute.current_angle(),
            moved_ms
        );
        bus.close();
        Ok(())
    }
}
