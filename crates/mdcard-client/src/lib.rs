//! # mdcard-client
//!
//! 步进电机客户端层，包括：
//! - 事件驱动状态机引擎（同步转换、后台动作、内部回调）
//! - 基本步进电机状态机（idle / moving / error / disabled）
//! - 带限位开关的电机：完整校准与容差测量
//!
//! # 使用场景
//!
//! 大多数用户应该使用本层。需要直接读写寄存器时使用 `mdcard-driver`。
//!
//! # 示例
//!
//! ```rust,ignore
//! use mdcard_client::{ReferenceConfig, StepperMotorWithReference};
//!
//! let motor = StepperMotorWithReference::new(card.motor_controler(0)?, ReferenceConfig::default())?;
//! motor.set_enabled(true)?;
//! motor.calibrate()?;
//! motor.wait_until_idle(Duration::from_secs(60))?;
//! println!("{:?}", motor.calibration_record());
//! ```

pub mod calibration;
pub mod config;
mod error;
pub mod motor;
mod reference;
pub mod state;
pub mod statistics;

pub use calibration::{CalibrationMode, CalibrationRecord, CalibrationStatus, ToleranceStatus};
pub use config::ReferenceConfig;
pub use error::ClientError;
pub use motor::{SoftwareLimits, StepperMotor};
pub use reference::StepperMotorWithReference;
pub use state::{Event, StateId, StateMachine, StateMachineBuilder, Transition};
