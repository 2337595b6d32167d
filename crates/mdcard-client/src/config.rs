//! 校准与容差测量配置

use std::time::Duration;

/// 带参考开关电机的运动参数
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReferenceConfig {
    /// 搜索限位开关时每一步的距离（微步）
    pub calibration_step: i32,
    /// 等待电机停止时的轮询间隔
    pub poll_interval: Duration,
    /// 每个限位开关的容差测量次数
    pub tolerance_trials: usize,
    /// 容差测量时离开限位开关的距离（微步）
    pub tolerance_approach_offset: i32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            calibration_step: 10_000,
            poll_interval: Duration::from_millis(1),
            tolerance_trials: 10,
            tolerance_approach_offset: 1_000,
        }
    }
}
