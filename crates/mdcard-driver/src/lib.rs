//! # mdcard-driver
//!
//! 电机驱动卡驱动层，包括：
//! - 寄存器后端抽象（按模块限定路径读写标量寄存器）
//! - SPI 握手传输（有界重试、故障分类、事务串行化）
//! - TMC429 / TMC260 寄存器会话
//! - 电机控制器（每电机一把锁，单位换算）
//! - 驱动卡初始化（固件版本检查、公共寄存器）与注册表
//!
//! # 使用场景
//!
//! 适用于需要直接读写电机寄存器的场景。需要运动状态机、校准等功能时，
//! 使用 `mdcard-client` 提供的更高级接口。
//!
//! # 测试
//!
//! 启用 `mock` feature 后可以使用 [`mock::DummyCard`] 代替真实硬件。

pub mod backend;
mod card;
pub mod config;
pub mod converter;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod motor;
mod registry;
pub mod session;
pub mod spi;

pub use backend::{RegisterBackend, ScalarRegister};
pub use card::{MotorDriverCard, decode_firmware_version};
pub use config::{MotorControlerConfig, MotorDriverCardConfig};
pub use converter::{CurrentConverter, SignedIntConverter, SpeedConverter};
pub use error::{BackendError, DriverError};
pub use motor::{MotorControl, MotorControlerImpl, ReferenceSwitchData};
pub use registry::CardRegistry;
pub use session::{ControlerSpiSession, DriverSpiSession};
pub use spi::{HandshakeState, HandshakeTransport, SpiTiming};
