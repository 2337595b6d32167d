//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use mdcard_sdk::prelude::*;
//! ```

// 客户端层（推荐使用）
pub use crate::client::{
    CalibrationMode, CalibrationRecord, CalibrationStatus, ReferenceConfig, SoftwareLimits,
    StepperMotor, StepperMotorWithReference, ToleranceStatus,
};

// 驱动层
pub use crate::driver::{
    CardRegistry, MotorControl, MotorDriverCard, MotorDriverCardConfig, RegisterBackend,
};

// 错误类型
pub use crate::client::ClientError;
pub use crate::driver::{BackendError, DriverError};
pub use crate::protocol::ProtocolError;
