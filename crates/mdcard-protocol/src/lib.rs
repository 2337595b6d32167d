//! # mdcard-protocol
//!
//! 电机驱动卡寄存器协议层（无硬件依赖）
//!
//! 负责 TMC429 运动控制器与 TMC260 步进驱动器寄存器的位精确编码/解码。
//!
//! # 模块
//!
//! - [`word`]: 32 位数据字与命名位段
//! - [`register`]: 寄存器描述符接口（地址 + 有效负载）
//! - [`tmc429`]: 运动控制器输入/输出字与寄存器
//! - [`tmc260`]: 驱动器 20 位数据报

pub mod register;
pub mod tmc260;
pub mod tmc429;
pub mod word;

pub use register::{AddressWord, RegisterWord};
pub use tmc260::{
    ChopperControlData, CoolStepControlData, DriverConfigData, DriverControlData, DriverRegister,
    DriverRegisterKind, DriverStatusFlags, StallGuardControlData,
};
pub use tmc429::{
    AccelerationThresholdData, CommonRegister, ControlerInputWord, ControlerOutputWord,
    ControlerRegister, ControlerRegisterKind, ControlerStatusBits, DividersAndMicroStepResolutionData,
    InterfaceConfiguration, InterruptData, MotorRegister, ProportionalityFactorData, RampMode,
    ReferenceConfigAndRampModeData, ReferenceSwitchBits, Selector, StepperMotorGlobalParameters,
};
pub use word::{BitRange, DataWord, Field};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Value 0x{value:X} does not fit into {width}-bit field {field}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        width: u32,
    },

    #[error("Invalid address for {register}: expected 0x{expected:X}, got 0x{actual:X}")]
    InvalidAddress {
        register: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("Invalid value for {field}: 0x{value:X}")]
    InvalidValue { field: &'static str, value: u32 },
}
