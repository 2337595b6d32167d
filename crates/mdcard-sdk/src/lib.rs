//! mdcard SDK - TMC429/TMC260 电机驱动卡 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 寄存器位段的编码/解码
//! - **驱动层** (`driver`): SPI 握手、寄存器会话、电机控制器、驱动卡初始化
//! - **客户端层** (`client`): 运动状态机、校准与容差测量
//!
//! # 快速开始
//!
//! 大多数用户应该使用客户端层：
//!
//! ```rust
//! use mdcard_sdk::prelude::*;
//! // 或
//! use mdcard_sdk::{StepperMotor, StepperMotorWithReference};
//! ```
//!
//! 需要直接读写寄存器的用户可以使用驱动层：
//!
//! ```rust
//! use mdcard_sdk::driver::{MotorControlerImpl, MotorDriverCard};
//! ```

pub use mdcard_client as client;
pub use mdcard_driver as driver;
pub use mdcard_protocol as protocol;

pub mod prelude;

// --- 用户以此为界 ---

pub use protocol::ProtocolError;

pub use driver::{
    BackendError, CardRegistry, DriverError, MotorControl, MotorDriverCard, MotorDriverCardConfig,
    RegisterBackend,
};

pub use client::{
    CalibrationMode, CalibrationRecord, CalibrationStatus, ClientError, ReferenceConfig,
    StepperMotor, StepperMotorWithReference, ToleranceStatus,
};

/// 默认日志过滤指令
pub const DEFAULT_LOG_DIRECTIVE: &str = "mdcard=info";

/// 安装 `tracing-subscriber` 的 fmt 订阅器
///
/// 过滤规则取自 `RUST_LOG`，未设置时使用 [`DEFAULT_LOG_DIRECTIVE`]。
/// 已经安装过全局订阅器时返回 `false`，重复调用是安全的。
pub fn init_logging() -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    let installed = tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok();
    if installed {
        tracing::debug!("Logging initialized");
    } else {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试重复初始化日志不会 panic
    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        assert!(!init_logging());
    }

    /// 测试初始化后全局订阅器可用
    #[test]
    fn test_init_logging_installs_global_dispatcher() {
        init_logging();
        assert!(tracing::dispatcher::has_been_set());
        tracing::info!("mdcard_sdk test event");
    }
}
