//! 输入验证

use anyhow::{Result, bail};
use sorter_client::{BinAddress, DistributionLayout};

/// 单次手动运动的上限（圈）
pub const MAX_MANUAL_TURNS: f64 = 10.0;

/// 把 `--degrees` / `--steps` 换算为微步数
///
/// # 错误
/// - 两者都未给出
/// - 角度为 NaN 或无穷大
/// - 超过 [`MAX_MANUAL_TURNS`] 圈
pub fn resolve_steps(degrees: Option<f64>, steps: Option<i64>, steps_per_rev: u32) -> Result<i64> {
    let steps = match (degrees, steps) {
        (Some(degrees), _) => {
            if !degrees.is_finite() {
                bail!("Invalid angle: {}", degrees);
            }
            (degrees / 360.0 * f64::from(steps_per_rev)).round() as i64
        },
        (None, Some(steps)) => steps,
        (None, None) => bail!("Specify the amount with --degrees or --steps"),
    };

    let turns = steps.unsigned_abs() as f64 / f64::from(steps_per_rev.max(1));
    if turns > MAX_MANUAL_TURNS {
        bail!(
            "{} steps is {:.1} turns, more than the {} turn limit",
            steps,
            turns,
            MAX_MANUAL_TURNS
        );
    }
    Ok(steps)
}

/// 检查料仓地址是否在布局内
pub fn check_bin(layout: &DistributionLayout, address: BinAddress) -> Result<()> {
    if layout.contains(address) {
        return Ok(());
    }
    let layers = layout.layers.len();
    if address.layer_index >= layers {
        bail!("Layer {} does not exist ({} layers)", address.layer_index, layers);
    }
    bail!("Bin {} is outside the configured layout", address);
}
