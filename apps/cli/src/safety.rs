//! 手动运动前的安全确认

use anyhow::Result;

/// 超过一整圈的手动运动需要确认
pub fn requires_confirmation(steps: i64, steps_per_rev: u32, force: bool) -> bool {
    !force && steps.unsigned_abs() > u64::from(steps_per_rev)
}

/// 显示确认提示，默认为否
pub fn confirm_large_move(axis: &str, steps: i64, steps_per_rev: u32) -> Result<bool> {
    let turns = steps as f64 / f64::from(steps_per_rev.max(1));
    println!("⚠️  大幅运动: {} 将转动 {:.2} 圈（{} 微步）", axis, turns, steps);

    let confirmed = inquire::Confirm::new("确定要继续吗？")
        .with_default(false)
        .prompt()
        .map_err(|e| anyhow::anyhow!("Confirmation prompt failed: {}", e))?;
    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_confirmation() {
        assert!(!requires_confirmation(1600, 1600, false));
        assert!(requires_confirmation(1601, 1600, false));
        assert!(requires_confirmation(-3200, 1600, false));
        assert!(!requires_confirmation(-3200, 1600, true));
    }
}
