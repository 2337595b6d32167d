//! 客户端层错误类型定义

use mdcard_driver::DriverError;
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// 驱动层错误（原样传递）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 当前状态不允许该操作
    #[error("Action '{action}' not allowed in state '{state}'")]
    ActionNotAllowed { state: String, action: &'static str },

    /// 目标位置超出允许范围
    #[error("Target position {target} outside allowed range [{min}, {max}]")]
    LimitExceeded { target: i32, min: f64, max: f64 },

    /// 需要先完成完整校准
    #[error("Motor is not fully calibrated")]
    NotCalibrated,

    /// 等待超时
    #[error("Timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}
